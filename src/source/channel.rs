use crate::source::record::NativeRecord;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("channel '{channel}' unavailable: {reason}")]
    ChannelUnavailable { channel: String, reason: String },

    #[error("io error on channel '{channel}': {source}")]
    Io {
        channel: String,
        #[source]
        source: std::io::Error,
    },
}

impl SourceError {
    /// Maps an I/O failure on open: missing or forbidden channels are
    /// unavailable, anything else is a plain I/O error.
    pub fn from_open_error(channel: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                SourceError::ChannelUnavailable {
                    channel: channel.to_string(),
                    reason: err.to_string(),
                }
            }
            _ => SourceError::Io {
                channel: channel.to_string(),
                source: err,
            },
        }
    }
}

/// Opens OS log channels.
///
/// Handles carry no durable position: a collector that reopens a channel
/// after a fault relies on its watermark to skip what was already ingested.
#[async_trait]
pub trait ChannelSource: Send + Sync {
    async fn open_channel(&self, name: &str) -> Result<Box<dyn ChannelHandle>, SourceError>;
}

/// An open channel yielding native records in the source's configured direction.
#[async_trait]
pub trait ChannelHandle: Send {
    fn channel(&self) -> &str;

    /// Total records the channel held when it was opened, if known.
    fn record_count(&self) -> Option<u64>;

    /// Up to `max_count` further records; empty once the channel is exhausted.
    async fn read_batch(&mut self, max_count: usize) -> Result<Vec<NativeRecord>, SourceError>;
}
