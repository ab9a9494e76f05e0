pub mod channel;
pub mod format;
pub mod jsonl;
pub mod memory;
pub mod record;

pub use channel::{ChannelHandle, ChannelSource, SourceError};
pub use format::{format_message, FormatError, MESSAGE_UNAVAILABLE};
pub use jsonl::JsonlSource;
pub use memory::MemorySource;
pub use record::NativeRecord;

use crate::config::types::{SourceConfig, SourceType};
use std::sync::Arc;

/// Builds the channel source described by the config.
pub fn build_source(config: &SourceConfig) -> Arc<dyn ChannelSource> {
    match config.source_type {
        SourceType::Jsonl => Arc::new(JsonlSource::new(&config.path, config.direction)),
    }
}
