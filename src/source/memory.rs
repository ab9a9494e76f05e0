use crate::config::ReadDirection;
use crate::source::channel::{ChannelHandle, ChannelSource, SourceError};
use crate::source::record::NativeRecord;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct ChannelData {
    records: Vec<NativeRecord>,
    unavailable: Option<String>,
    read_delay: Option<Duration>,
}

/// In-process channel source. Records appended through a clone of the source
/// become visible to the next `open_channel`.
#[derive(Clone)]
pub struct MemorySource {
    channels: Arc<Mutex<HashMap<String, ChannelData>>>,
    direction: ReadDirection,
}

impl MemorySource {
    pub fn new(direction: ReadDirection) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            direction,
        }
    }

    fn with_channel<R>(&self, channel: &str, f: impl FnOnce(&mut ChannelData) -> R) -> R {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(channels.entry(channel.to_string()).or_default())
    }

    /// Appends records to a channel, creating it if needed.
    pub fn push(&self, channel: &str, records: impl IntoIterator<Item = NativeRecord>) {
        self.with_channel(channel, |data| data.records.extend(records));
    }

    /// Makes subsequent opens of `channel` fail with `ChannelUnavailable`.
    pub fn deny(&self, channel: &str, reason: &str) {
        self.with_channel(channel, |data| data.unavailable = Some(reason.to_string()));
    }

    pub fn allow(&self, channel: &str) {
        self.with_channel(channel, |data| data.unavailable = None);
    }

    /// Delays every read on `channel`, standing in for a hung OS call.
    pub fn set_read_delay(&self, channel: &str, delay: Option<Duration>) {
        self.with_channel(channel, |data| data.read_delay = delay);
    }
}

#[async_trait]
impl ChannelSource for MemorySource {
    async fn open_channel(&self, name: &str) -> Result<Box<dyn ChannelHandle>, SourceError> {
        let channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let data = channels
            .get(name)
            .ok_or_else(|| SourceError::ChannelUnavailable {
                channel: name.to_string(),
                reason: "channel does not exist".to_string(),
            })?;

        if let Some(reason) = &data.unavailable {
            return Err(SourceError::ChannelUnavailable {
                channel: name.to_string(),
                reason: reason.clone(),
            });
        }

        let mut records: VecDeque<NativeRecord> = data.records.iter().cloned().collect();
        if self.direction == ReadDirection::Backwards {
            records.make_contiguous().reverse();
        }

        Ok(Box::new(MemoryHandle {
            channel: name.to_string(),
            total: records.len() as u64,
            records,
            read_delay: data.read_delay,
        }))
    }
}

struct MemoryHandle {
    channel: String,
    total: u64,
    records: VecDeque<NativeRecord>,
    read_delay: Option<Duration>,
}

#[async_trait]
impl ChannelHandle for MemoryHandle {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn record_count(&self) -> Option<u64> {
        Some(self.total)
    }

    async fn read_batch(&mut self, max_count: usize) -> Result<Vec<NativeRecord>, SourceError> {
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        let take = max_count.min(self.records.len());
        Ok(self.records.drain(..take).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn native(record_number: u64) -> NativeRecord {
        NativeRecord {
            record_number,
            event_id: 7036,
            source_name: "Service Control Manager".to_string(),
            time_generated: Utc::now(),
            event_type: 4,
            event_category: 0,
            message_template: None,
            insertion_strings: vec![],
        }
    }

    #[tokio::test]
    async fn test_pushed_records_visible_on_next_open() {
        let source = MemorySource::new(ReadDirection::Forwards);
        source.push("System", [native(1)]);

        let mut first = source.open_channel("System").await.unwrap();
        source.push("System", [native(2)]);

        assert_eq!(first.read_batch(10).await.unwrap().len(), 1);

        let mut second = source.open_channel("System").await.unwrap();
        let numbers: Vec<u64> = second
            .read_batch(10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.record_number)
            .collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_deny_and_allow() {
        let source = MemorySource::new(ReadDirection::Backwards);
        source.push("Security", [native(1)]);
        source.deny("Security", "access denied");

        assert!(matches!(
            source.open_channel("Security").await,
            Err(SourceError::ChannelUnavailable { .. })
        ));

        source.allow("Security");
        assert!(source.open_channel("Security").await.is_ok());
        assert!(source.open_channel("Nope").await.is_err());
    }
}
