use crate::collector::CollectorState;
use crate::storage::ApplyOutcome;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Last known status of one channel collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectorStatus {
    pub state: CollectorState,
    pub cycles: u64,
    pub last_error: Option<String>,
}

impl Default for CollectorStatus {
    fn default() -> Self {
        Self {
            state: CollectorState::Idle,
            cycles: 0,
            last_error: None,
        }
    }
}

/// Point-in-time copy of the pipeline counters, as served by `/api/status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub batches_enqueued: u64,
    pub batches_written: u64,
    pub batches_skipped: u64,
    pub records_written: u64,
    pub records_replaced: u64,
    pub write_retries: u64,
    pub collectors: BTreeMap<String, CollectorStatus>,
}

/// Shared counters updated by collectors and the writer.
#[derive(Debug, Default)]
pub struct PipelineStats {
    batches_enqueued: AtomicU64,
    batches_written: AtomicU64,
    batches_skipped: AtomicU64,
    records_written: AtomicU64,
    records_replaced: AtomicU64,
    write_retries: AtomicU64,
    collectors: Mutex<HashMap<String, CollectorStatus>>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_enqueued(&self) {
        self.batches_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_written(&self, outcome: &ApplyOutcome) {
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.records_written
            .fetch_add(outcome.inserted as u64, Ordering::Relaxed);
        self.records_replaced
            .fetch_add((outcome.replaced + outcome.collapsed) as u64, Ordering::Relaxed);
    }

    pub fn batch_skipped(&self) {
        self.batches_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_retried(&self) {
        self.write_retries.fetch_add(1, Ordering::Relaxed);
    }

    fn with_collector<R>(&self, channel: &str, f: impl FnOnce(&mut CollectorStatus) -> R) -> R {
        let mut collectors = self
            .collectors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(collectors.entry(channel.to_string()).or_default())
    }

    pub fn set_collector_state(&self, channel: &str, state: CollectorState) {
        self.with_collector(channel, |status| status.state = state);
    }

    /// Marks a finished cycle and clears the last error.
    pub fn cycle_completed(&self, channel: &str) {
        self.with_collector(channel, |status| {
            status.cycles += 1;
            status.last_error = None;
        });
    }

    pub fn collector_failed(&self, channel: &str, error: String) {
        self.with_collector(channel, |status| {
            status.cycles += 1;
            status.last_error = Some(error);
        });
    }

    pub fn collector_status(&self, channel: &str) -> Option<CollectorStatus> {
        self.collectors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(channel)
            .cloned()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let collectors = self
            .collectors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(channel, status)| (channel.clone(), status.clone()))
            .collect();

        StatsSnapshot {
            batches_enqueued: self.batches_enqueued.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            batches_skipped: self.batches_skipped.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            records_replaced: self.records_replaced.load(Ordering::Relaxed),
            write_retries: self.write_retries.load(Ordering::Relaxed),
            collectors,
        }
    }
}
