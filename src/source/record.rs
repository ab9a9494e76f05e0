use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A record exactly as the OS channel hands it out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeRecord {
    /// Per-channel record number; strictly increasing, starting at 1
    pub record_number: u64,
    /// Native event id, possibly carrying qualifier bits above the low 16
    pub event_id: u32,
    pub source_name: String,
    pub time_generated: DateTime<Utc>,
    pub event_type: u16,
    #[serde(default)]
    pub event_category: u16,
    /// Message resource for this event, with `%1`..`%n` insertion points
    #[serde(default)]
    pub message_template: Option<String>,
    #[serde(default)]
    pub insertion_strings: Vec<String>,
}
