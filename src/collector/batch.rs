use crate::collector::record::LogRecord;
use crate::storage::Watermark;
use uuid::Uuid;

/// Records from one channel produced by one poll cycle, handed to the writer
/// as a unit.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Unique batch ID (for log correlation)
    pub batch_id: Uuid,

    /// Channel every record in this batch belongs to
    pub channel: String,

    /// Poll cycle of the producing collector
    pub cycle: u64,

    /// Monotonic per-collector batch counter, starting at 0
    pub sequence_num: u64,

    /// Records in ascending record sequence
    pub records: Vec<LogRecord>,
}

impl Batch {
    pub fn new(channel: &str, cycle: u64, sequence_num: u64, records: Vec<LogRecord>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            channel: channel.to_string(),
            cycle,
            sequence_num,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Highest sequence and timestamp in the batch, or `None` when empty.
    pub fn watermark(&self) -> Option<Watermark> {
        self.records
            .iter()
            .map(|r| Watermark::new(r.record_sequence, r.time_generated))
            .reduce(Watermark::merge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::record::Severity;
    use chrono::{TimeZone, Utc};

    fn record(seq: u64, secs: i64) -> LogRecord {
        LogRecord {
            channel: "Security".to_string(),
            record_sequence: seq,
            event_code: 4625,
            raw_event_id: 4625,
            source_name: "Microsoft-Windows-Security-Auditing".to_string(),
            time_generated: Utc.timestamp_opt(secs, 0).unwrap(),
            event_type: 16,
            event_category: 12544,
            severity: Severity::Normal,
            message: "An account failed to log on.".to_string(),
        }
    }

    #[test]
    fn test_watermark_takes_componentwise_max() {
        // Sequence and clock disagree: the channel clock went backwards.
        let batch = Batch::new("Security", 1, 0, vec![record(7, 500), record(9, 400)]);
        let wm = batch.watermark().unwrap();

        assert_eq!(wm.last_record_sequence, 9);
        assert_eq!(wm.last_time_generated, Utc.timestamp_opt(500, 0).unwrap());
    }

    #[test]
    fn test_empty_batch_has_no_watermark() {
        let batch = Batch::new("Security", 1, 0, vec![]);
        assert!(batch.is_empty());
        assert!(batch.watermark().is_none());
    }
}
