use crate::collector::LogRecord;
use crate::storage::{Storage, StorageError};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;

/// A bounded random sample of stored records. Never persisted.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub records: Vec<LogRecord>,
}

/// Rows drawn from each channel: `ceil(sample_size / channel_count)`.
pub fn channel_share(sample_size: usize, channel_count: usize) -> usize {
    if channel_count == 0 {
        return 0;
    }
    sample_size.div_ceil(channel_count)
}

/// Draws channel-balanced samples from the store.
///
/// Each channel contributes at most its share; channels with fewer rows
/// simply contribute less, the shortfall is not handed to other channels.
pub struct Sampler {
    storage: Arc<dyn Storage>,
    channels: Vec<String>,
    sample_size: usize,
    recency_window: Option<Duration>,
}

impl Sampler {
    pub fn new(
        storage: Arc<dyn Storage>,
        channels: Vec<String>,
        sample_size: usize,
        recency_window: Option<Duration>,
    ) -> Self {
        Self {
            storage,
            channels,
            sample_size,
            recency_window,
        }
    }

    fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let window = chrono::Duration::from_std(self.recency_window?).ok()?;
        now.checked_sub_signed(window)
    }

    pub async fn sample(&self) -> Result<Snapshot, StorageError> {
        let taken_at = Utc::now();
        let since = self.since(taken_at);
        let share = channel_share(self.sample_size, self.channels.len());

        let mut records = Vec::with_capacity(share * self.channels.len());
        for channel in &self.channels {
            records.extend(self.storage.sample_channel(channel, share, since).await?);
        }

        records.shuffle(&mut rand::thread_rng());
        records.truncate(self.sample_size);

        Ok(Snapshot { taken_at, records })
    }
}
