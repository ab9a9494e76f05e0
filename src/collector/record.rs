use crate::source::NativeRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    Warning,
    Normal,
}

impl Severity {
    /// Error (1) is critical, warning (2) and audit failure (3) are
    /// warnings, everything else is normal.
    pub fn classify(event_type: u16) -> Self {
        match event_type {
            1 => Severity::Critical,
            2 | 3 => Severity::Warning,
            _ => Severity::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::Warning => "Warning",
            Severity::Normal => "Normal",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "warning" => Ok(Severity::Warning),
            "normal" => Ok(Severity::Normal),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// A classified, formatted record ready for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub channel: String,
    pub record_sequence: u64,
    pub event_code: u16,
    pub raw_event_id: u32,
    pub source_name: String,
    pub time_generated: DateTime<Utc>,
    pub event_type: u16,
    pub event_category: u16,
    pub severity: Severity,
    pub message: String,
}

impl LogRecord {
    pub fn from_native(channel: &str, native: NativeRecord, message: String) -> Self {
        Self {
            channel: channel.to_string(),
            record_sequence: native.record_number,
            event_code: (native.event_id & 0xFFFF) as u16,
            raw_event_id: native.event_id,
            source_name: native.source_name,
            time_generated: native.time_generated,
            event_type: native.event_type,
            event_category: native.event_category,
            severity: Severity::classify(native.event_type),
            message,
        }
    }
}
