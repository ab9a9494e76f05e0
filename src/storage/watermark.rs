use crate::storage::traits::{Storage, StorageError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Newest record already ingested for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Watermark {
    pub last_record_sequence: u64,
    pub last_time_generated: DateTime<Utc>,
}

impl Watermark {
    pub fn new(last_record_sequence: u64, last_time_generated: DateTime<Utc>) -> Self {
        Self {
            last_record_sequence,
            last_time_generated,
        }
    }

    /// Starting point for a channel that has never been ingested.
    pub fn zero() -> Self {
        Self::new(0, DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Componentwise maximum. Never moves either cursor backwards.
    pub fn merge(self, other: Watermark) -> Watermark {
        Watermark {
            last_record_sequence: self.last_record_sequence.max(other.last_record_sequence),
            last_time_generated: self.last_time_generated.max(other.last_time_generated),
        }
    }

    /// Whether a record with this sequence is newer than the watermark.
    pub fn admits(&self, record_sequence: u64) -> bool {
        record_sequence > self.last_record_sequence
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::zero()
    }
}

/// Cached view of the durable per-channel watermarks.
///
/// The store is authoritative; the cache only ever moves forward, fed by the
/// batch writer after each commit.
pub struct WatermarkStore {
    storage: Arc<dyn Storage>,
    cache: RwLock<HashMap<String, Watermark>>,
}

impl WatermarkStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Loads every stored watermark into the cache. Returns how many were found.
    pub async fn preload(&self) -> Result<usize, StorageError> {
        let stored = self.storage.load_watermarks().await?;
        let count = stored.len();
        let mut cache = self.cache.write().await;
        for (channel, wm) in stored {
            let entry = cache.entry(channel).or_insert(wm);
            *entry = entry.merge(wm);
        }
        Ok(count)
    }

    /// Current watermark for `channel`, zero if nothing was ever ingested.
    pub async fn current(&self, channel: &str) -> Result<Watermark, StorageError> {
        if let Some(wm) = self.cache.read().await.get(channel) {
            return Ok(*wm);
        }

        let stored = self
            .storage
            .load_watermark(channel)
            .await?
            .unwrap_or_default();

        let mut cache = self.cache.write().await;
        let entry = cache.entry(channel.to_string()).or_insert(stored);
        *entry = entry.merge(stored);
        Ok(*entry)
    }

    /// Records a committed watermark.
    pub async fn record_committed(&self, channel: &str, wm: Watermark) {
        let mut cache = self.cache.write().await;
        let entry = cache.entry(channel.to_string()).or_insert(wm);
        *entry = entry.merge(wm);
    }

    pub async fn snapshot(&self) -> HashMap<String, Watermark> {
        self.cache.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_merge_never_decreases() {
        let a = Watermark::new(10, at(100));
        let b = Watermark::new(5, at(200));
        let merged = a.merge(b);

        assert_eq!(merged, Watermark::new(10, at(200)));
        assert_eq!(merged.merge(Watermark::zero()), merged);
    }

    #[test]
    fn test_admits_strictly_newer() {
        let wm = Watermark::new(10, at(100));
        assert!(!wm.admits(9));
        assert!(!wm.admits(10));
        assert!(wm.admits(11));
        assert!(Watermark::zero().admits(1));
    }
}
