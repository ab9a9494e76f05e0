use crate::pipeline::queue::BatchSender;
use crate::pipeline::stats::PipelineStats;
use crate::storage::{Storage, WatermarkStore};
use std::sync::Arc;
use tokio::sync::watch;

/// Handles shared by every pipeline worker. Built once at startup.
#[derive(Clone)]
pub struct PipelineContext {
    pub storage: Arc<dyn Storage>,
    pub watermarks: Arc<WatermarkStore>,
    pub queue: BatchSender,
    pub stats: Arc<PipelineStats>,
    pub shutdown: watch::Receiver<bool>,
}

impl PipelineContext {
    pub fn new(
        storage: Arc<dyn Storage>,
        queue: BatchSender,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            watermarks: Arc::new(WatermarkStore::new(storage.clone())),
            storage,
            queue,
            stats: Arc::new(PipelineStats::new()),
            shutdown,
        }
    }
}
