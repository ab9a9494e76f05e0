use crate::collector::{Batch, LogRecord, Severity};
use crate::storage::watermark::Watermark;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("invalid stored value in column '{column}': {reason}")]
    InvalidValue { column: &'static str, reason: String },
}

impl From<duckdb::Error> for StorageError {
    fn from(err: duckdb::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

/// Result of applying one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Rows written
    pub inserted: usize,
    /// Existing rows with the same dedup key that were replaced
    pub replaced: usize,
    /// Records dropped because a later record in the same batch had the same key
    pub collapsed: usize,
    /// Channel watermark after the commit
    pub watermark: Option<Watermark>,
}

/// Simple filters for listing stored records, newest first.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub channel: Option<String>,
    pub severity: Option<Severity>,
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn init_schema(&self) -> Result<(), StorageError>;

    /// Replaces rows sharing the batch's dedup keys, inserts the batch and
    /// advances the channel watermark, all in one transaction.
    async fn apply_batch(&self, batch: &Batch) -> Result<ApplyOutcome, StorageError>;

    async fn load_watermark(&self, channel: &str) -> Result<Option<Watermark>, StorageError>;

    async fn load_watermarks(&self) -> Result<HashMap<String, Watermark>, StorageError>;

    /// Up to `limit` rows of `channel` drawn uniformly at random, optionally
    /// restricted to rows generated at or after `since`.
    async fn sample_channel(
        &self,
        channel: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LogRecord>, StorageError>;

    async fn query_logs(&self, filter: &LogFilter) -> Result<Vec<LogRecord>, StorageError>;

    async fn count_logs(&self, channel: Option<&str>) -> Result<u64, StorageError>;
}
