pub mod context;
pub mod queue;
pub mod schedule;
pub mod stats;
pub mod writer;

pub use context::PipelineContext;
pub use queue::{batch_queue, BatchReceiver, BatchSender, QueueItem};
pub use schedule::Ticker;
pub use stats::{CollectorStatus, PipelineStats, StatsSnapshot};
pub use writer::run_writer;
