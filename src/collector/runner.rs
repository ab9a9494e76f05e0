use crate::collector::batch::Batch;
use crate::collector::record::LogRecord;
use crate::config::types::{CollectorConfig, ReadDirection, SourceConfig};
use crate::pipeline::{PipelineContext, QueueItem, Ticker};
use crate::source::{
    format_message, ChannelHandle, ChannelSource, NativeRecord, SourceError, MESSAGE_UNAVAILABLE,
};
use crate::storage::{StorageError, Watermark};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Where a channel collector is in its poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorState {
    Idle,
    Opening,
    Reading,
    Filtering,
    Batching,
    Backoff,
}

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("read on channel '{channel}' timed out after {timeout:?}")]
    Timeout { channel: String, timeout: Duration },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("batch queue closed")]
    QueueClosed,
}

/// What one poll cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Native records pulled from the source
    pub read: usize,
    /// Records newer than the watermark that were enqueued
    pub accepted: usize,
    /// Records at or below the watermark
    pub skipped: usize,
    pub batches: usize,
    /// Records stored with the placeholder message
    pub format_failures: usize,
    /// The per-cycle cap left unseen records for the next cycle
    pub truncated: bool,
}

/// Per-channel worker: reads records newer than the channel watermark and
/// pushes them to the writer in batches.
pub struct ChannelCollector {
    channel: String,
    source: Arc<dyn ChannelSource>,
    ctx: PipelineContext,
    config: CollectorConfig,
    direction: ReadDirection,
    read_chunk: usize,
    read_timeout: Duration,
    cycle: u64,
    next_batch_seq: u64,
    /// Highest sequence already handed to the queue. Covers the window
    /// between enqueue and the writer's commit.
    enqueued_high: u64,
}

impl ChannelCollector {
    pub fn new(
        channel: &str,
        source: Arc<dyn ChannelSource>,
        ctx: PipelineContext,
        config: CollectorConfig,
        source_config: &SourceConfig,
    ) -> Self {
        Self {
            channel: channel.to_string(),
            source,
            ctx,
            config,
            direction: source_config.direction,
            read_chunk: source_config.read_chunk.max(1),
            read_timeout: source_config.read_timeout,
            cycle: 0,
            next_batch_seq: 0,
            enqueued_high: 0,
        }
    }

    fn timed_out(&self) -> CollectorError {
        CollectorError::Timeout {
            channel: self.channel.clone(),
            timeout: self.read_timeout,
        }
    }

    fn set_state(&self, state: CollectorState) {
        self.ctx.stats.set_collector_state(&self.channel, state);
    }

    /// Poll loop. Faults are logged and followed by a backoff; only shutdown
    /// or a closed queue ends the loop.
    pub async fn run(mut self) {
        let mut ticker = Ticker::new(
            self.config.poll_interval,
            self.config.jitter,
            self.ctx.shutdown.clone(),
        );

        info!(channel = %self.channel, direction = ?self.direction, "Collector started");

        while ticker.tick().await {
            match self.poll_once().await {
                Ok(report) => {
                    self.ctx.stats.cycle_completed(&self.channel);
                    self.set_state(CollectorState::Idle);
                    if report.accepted > 0 {
                        info!(
                            channel = %self.channel,
                            count = report.accepted,
                            batches = report.batches,
                            skipped = report.skipped,
                            "Collected new records"
                        );
                    } else {
                        debug!(channel = %self.channel, read = report.read, "No new records");
                    }
                }
                Err(CollectorError::QueueClosed) => {
                    warn!(channel = %self.channel, "Batch queue closed, stopping collector");
                    break;
                }
                Err(e) => {
                    warn!(
                        channel = %self.channel,
                        error = %e,
                        backoff = ?self.config.backoff,
                        "Collection cycle failed, backing off"
                    );
                    self.ctx.stats.collector_failed(&self.channel, e.to_string());
                    self.set_state(CollectorState::Backoff);
                    if !ticker.sleep(self.config.backoff).await {
                        break;
                    }
                    self.set_state(CollectorState::Idle);
                }
            }
        }

        self.set_state(CollectorState::Idle);
        info!(channel = %self.channel, "Collector stopped");
    }

    /// Runs a single collection cycle.
    pub async fn poll_once(&mut self) -> Result<CycleReport, CollectorError> {
        self.cycle += 1;

        self.set_state(CollectorState::Opening);
        let open = self.source.open_channel(&self.channel);
        let mut handle = tokio::time::timeout(self.read_timeout, open)
            .await
            .map_err(|_| self.timed_out())??;
        if let Some(count) = handle.record_count() {
            debug!(channel = %self.channel, count, "Opened channel");
        }

        let watermark = self.ctx.watermarks.current(&self.channel).await?;
        // Batches still queued for the writer count as seen.
        let floor = Watermark {
            last_record_sequence: watermark.last_record_sequence.max(self.enqueued_high),
            ..watermark
        };

        match self.direction {
            ReadDirection::Forwards => self.collect_forwards(handle.as_mut(), floor).await,
            ReadDirection::Backwards => self.collect_backwards(handle.as_mut(), floor).await,
        }
    }

    async fn read_chunk(
        &self,
        handle: &mut dyn ChannelHandle,
    ) -> Result<Vec<NativeRecord>, CollectorError> {
        self.set_state(CollectorState::Reading);
        let chunk = tokio::time::timeout(self.read_timeout, handle.read_batch(self.read_chunk))
            .await
            .map_err(|_| self.timed_out())??;
        self.set_state(CollectorState::Filtering);
        Ok(chunk)
    }

    /// Oldest records come first: stream them into batches, stop at the cap.
    async fn collect_forwards(
        &mut self,
        handle: &mut dyn ChannelHandle,
        floor: Watermark,
    ) -> Result<CycleReport, CollectorError> {
        let mut report = CycleReport::default();
        let mut pending = Vec::with_capacity(self.config.batch_size);

        'read: loop {
            let chunk = self.read_chunk(handle).await?;
            if chunk.is_empty() {
                break;
            }
            report.read += chunk.len();

            for native in chunk {
                if !floor.admits(native.record_number) {
                    report.skipped += 1;
                    continue;
                }
                if report.accepted >= self.config.max_records_per_cycle {
                    report.truncated = true;
                    break 'read;
                }
                pending.push(self.convert(native, &mut report));
                report.accepted += 1;

                if pending.len() >= self.config.batch_size {
                    let full = std::mem::replace(
                        &mut pending,
                        Vec::with_capacity(self.config.batch_size),
                    );
                    self.enqueue(full, &mut report).await?;
                }
            }
        }

        self.enqueue(pending, &mut report).await?;
        self.warn_if_truncated(&report);
        Ok(report)
    }

    /// Newest records come first: everything up to the first record at or
    /// below the floor is unseen. When more than the cap are unseen, the
    /// oldest ones are kept so the next cycle continues without a gap.
    async fn collect_backwards(
        &mut self,
        handle: &mut dyn ChannelHandle,
        floor: Watermark,
    ) -> Result<CycleReport, CollectorError> {
        let mut report = CycleReport::default();
        let cap = self.config.max_records_per_cycle;
        let mut unseen: VecDeque<NativeRecord> = VecDeque::new();

        'read: loop {
            let chunk = self.read_chunk(handle).await?;
            if chunk.is_empty() {
                break;
            }
            report.read += chunk.len();

            for native in chunk {
                if !floor.admits(native.record_number) {
                    report.skipped += 1;
                    break 'read;
                }
                if unseen.len() >= cap {
                    unseen.pop_front();
                    report.truncated = true;
                }
                unseen.push_back(native);
            }
        }

        let mut pending = Vec::with_capacity(self.config.batch_size.min(unseen.len()));
        // Newest-first; walk it backwards to emit ascending sequences.
        while let Some(native) = unseen.pop_back() {
            pending.push(self.convert(native, &mut report));
            report.accepted += 1;

            if pending.len() >= self.config.batch_size {
                let full = std::mem::replace(&mut pending, Vec::with_capacity(self.config.batch_size));
                self.enqueue(full, &mut report).await?;
            }
        }

        self.enqueue(pending, &mut report).await?;
        self.warn_if_truncated(&report);
        Ok(report)
    }

    fn convert(&self, native: NativeRecord, report: &mut CycleReport) -> LogRecord {
        let message = match format_message(&native) {
            Ok(message) => message,
            Err(e) => {
                debug!(
                    channel = %self.channel,
                    record = native.record_number,
                    error = %e,
                    "Message formatting failed"
                );
                report.format_failures += 1;
                MESSAGE_UNAVAILABLE.to_string()
            }
        };
        LogRecord::from_native(&self.channel, native, message)
    }

    async fn enqueue(
        &mut self,
        records: Vec<LogRecord>,
        report: &mut CycleReport,
    ) -> Result<(), CollectorError> {
        let Some(high) = records.iter().map(|r| r.record_sequence).max() else {
            return Ok(());
        };

        self.set_state(CollectorState::Batching);
        let batch = Batch::new(&self.channel, self.cycle, self.next_batch_seq, records);
        debug!(
            channel = %self.channel,
            batch_id = %batch.batch_id,
            records = batch.len(),
            "Enqueueing batch"
        );

        // Blocks while the queue is full.
        self.ctx
            .queue
            .send(QueueItem::Batch(batch))
            .await
            .map_err(|_| CollectorError::QueueClosed)?;

        self.next_batch_seq += 1;
        self.enqueued_high = self.enqueued_high.max(high);
        self.ctx.stats.batch_enqueued();
        report.batches += 1;
        Ok(())
    }

    fn warn_if_truncated(&self, report: &CycleReport) {
        if report.truncated {
            warn!(
                channel = %self.channel,
                cap = self.config.max_records_per_cycle,
                "Per-cycle record cap reached, remaining records deferred to next cycle"
            );
        }
    }
}
