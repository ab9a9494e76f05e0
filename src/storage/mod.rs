pub mod duckdb;
pub mod traits;
pub mod watermark;

pub use traits::{ApplyOutcome, LogFilter, Storage, StorageError};
pub use watermark::{Watermark, WatermarkStore};
