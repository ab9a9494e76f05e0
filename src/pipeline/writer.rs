use crate::collector::Batch;
use crate::config::types::WriterConfig;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::queue::{BatchReceiver, QueueItem};
use crate::storage::{ApplyOutcome, StorageError};
use tracing::{debug, error, info, warn};

/// Single consumer of the batch queue.
///
/// Each batch is applied as one transaction. Failed batches are retried
/// whole; after `max_attempts` the batch is logged and skipped, so storage
/// failures never stop the writer. Returns once the `Shutdown` sentinel has
/// been seen and the queue drained.
pub async fn run_writer(mut queue: BatchReceiver, ctx: PipelineContext, config: WriterConfig) {
    info!("Batch writer started");

    loop {
        match queue.recv().await {
            Some(QueueItem::Batch(batch)) => write_batch(&ctx, &config, batch).await,
            Some(QueueItem::Shutdown) => {
                info!("Shutdown sentinel received, draining queue");
                break;
            }
            None => {
                info!("Batch queue closed");
                break;
            }
        }
    }

    let mut drained = 0;
    while let Ok(item) = queue.try_recv() {
        if let QueueItem::Batch(batch) = item {
            write_batch(&ctx, &config, batch).await;
            drained += 1;
        }
    }
    if drained > 0 {
        info!(batches = drained, "Drained batches queued after shutdown");
    }

    info!("Batch writer shutdown complete");
}

async fn write_batch(ctx: &PipelineContext, config: &WriterConfig, batch: Batch) {
    match apply_with_retry(ctx, config, &batch).await {
        Ok(outcome) => {
            if let Some(wm) = outcome.watermark {
                ctx.watermarks.record_committed(&batch.channel, wm).await;
            }
            ctx.stats.batch_written(&outcome);
            debug!(
                batch_id = %batch.batch_id,
                channel = %batch.channel,
                inserted = outcome.inserted,
                replaced = outcome.replaced,
                collapsed = outcome.collapsed,
                "Batch committed"
            );
        }
        Err(e) => {
            ctx.stats.batch_skipped();
            error!(
                batch_id = %batch.batch_id,
                channel = %batch.channel,
                records = batch.len(),
                attempts = config.max_attempts,
                error = %e,
                "Skipping poison batch"
            );
        }
    }
}

async fn apply_with_retry(
    ctx: &PipelineContext,
    config: &WriterConfig,
    batch: &Batch,
) -> Result<ApplyOutcome, StorageError> {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match ctx.storage.apply_batch(batch).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                warn!(
                    batch_id = %batch.batch_id,
                    channel = %batch.channel,
                    attempt,
                    error = %e,
                    "Batch write failed, retrying"
                );
                ctx.stats.write_retried();
                tokio::time::sleep(config.retry_backoff * attempt).await;
                attempt += 1;
            }
        }
    }
}
