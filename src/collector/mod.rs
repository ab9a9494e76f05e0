pub mod batch;
pub mod record;
pub mod runner;

pub use batch::Batch;
pub use record::{LogRecord, Severity};
pub use runner::{ChannelCollector, CollectorError, CollectorState, CycleReport};
