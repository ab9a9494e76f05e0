use crate::collector::{LogRecord, Severity};
use crate::live::sampler::Snapshot;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

pub const LOG_UPDATE_EVENT: &str = "log_update";

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("subscriber unreachable: {reason}")]
    SubscriberUnreachable { reason: String },
}

/// Wire form of a record in the live feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveRecord {
    pub channel: String,
    pub event_id: u32,
    pub event_code: u16,
    pub source: String,
    pub time_generated: String,
    pub event_type: u16,
    pub severity: Severity,
    pub message: String,
}

impl From<&LogRecord> for LiveRecord {
    fn from(record: &LogRecord) -> Self {
        Self {
            channel: record.channel.clone(),
            event_id: record.raw_event_id,
            event_code: record.event_code,
            source: record.source_name.clone(),
            time_generated: record.time_generated.to_rfc3339(),
            event_type: record.event_type,
            severity: record.severity,
            message: record.message.clone(),
        }
    }
}

#[derive(Serialize)]
struct Envelope {
    event: &'static str,
    data: Vec<LiveRecord>,
}

/// Serializes a snapshot into the `log_update` message sent to every subscriber.
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<Arc<str>, BroadcastError> {
    let envelope = Envelope {
        event: LOG_UPDATE_EVENT,
        data: snapshot.records.iter().map(LiveRecord::from).collect(),
    };
    Ok(serde_json::to_string(&envelope)?.into())
}

/// Fans each snapshot out to all subscribers.
///
/// The payload is encoded once per tick and shared. A subscriber that falls
/// behind loses the oldest ticks instead of holding up the others.
pub struct Broadcaster {
    tx: broadcast::Sender<Arc<str>>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publishes a snapshot; returns how many subscribers it was queued for.
    pub fn publish(&self, snapshot: &Snapshot) -> Result<usize, BroadcastError> {
        let payload = encode_snapshot(snapshot)?;
        // No subscribers is not an error, the tick is simply dropped.
        Ok(self.tx.send(payload).unwrap_or(0))
    }
}

/// One subscriber's view of the feed.
pub struct Subscription {
    rx: broadcast::Receiver<Arc<str>>,
}

impl Subscription {
    /// Next payload, skipping any ticks this subscriber missed. `None` once
    /// the broadcaster is gone.
    pub async fn next(&mut self) -> Option<Arc<str>> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Subscriber lagging, dropping missed ticks");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
