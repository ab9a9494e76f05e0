use crate::config::ReadDirection;
use crate::source::channel::{ChannelHandle, ChannelSource, SourceError};
use crate::source::record::NativeRecord;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, warn};

/// Channel source backed by a directory of JSON-lines exports, one file per
/// channel, oldest record first within each file.
pub struct JsonlSource {
    dir: PathBuf,
    direction: ReadDirection,
}

impl JsonlSource {
    pub fn new(dir: impl Into<PathBuf>, direction: ReadDirection) -> Self {
        Self {
            dir: dir.into(),
            direction,
        }
    }

    /// Export file for a channel. `/` cannot appear in a file name and is
    /// written as `%2F`.
    pub fn channel_path(&self, channel: &str) -> PathBuf {
        self.dir.join(export_file_name(channel))
    }
}

pub fn export_file_name(channel: &str) -> String {
    format!("{}.jsonl", channel.replace('/', "%2F"))
}

#[async_trait]
impl ChannelSource for JsonlSource {
    async fn open_channel(&self, name: &str) -> Result<Box<dyn ChannelHandle>, SourceError> {
        let path = self.channel_path(name);
        let file = File::open(&path)
            .await
            .map_err(|e| SourceError::from_open_error(name, e))?;
        let mut lines = ExportLines::new(name, &path, file);

        let records = match self.direction {
            ReadDirection::Forwards => {
                debug!(channel = %name, path = %path.display(), "Streaming channel export");
                Records::Streaming(lines)
            }
            ReadDirection::Backwards => {
                // Newest-first needs the whole export before the first record.
                let mut all = VecDeque::new();
                while let Some(record) = lines.next_record().await? {
                    all.push_front(record);
                }
                debug!(channel = %name, path = %path.display(), records = all.len(), "Opened channel export");
                Records::Buffered {
                    total: all.len() as u64,
                    records: all,
                }
            }
        };

        Ok(Box::new(JsonlHandle {
            channel: name.to_string(),
            records,
        }))
    }
}

/// Line reader over one export that skips blank and malformed lines.
struct ExportLines {
    channel: String,
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
    malformed: usize,
    finished: bool,
}

impl ExportLines {
    fn new(channel: &str, path: &Path, file: File) -> Self {
        Self {
            channel: channel.to_string(),
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            line_no: 0,
            malformed: 0,
            finished: false,
        }
    }

    async fn next_record(&mut self) -> Result<Option<NativeRecord>, SourceError> {
        loop {
            let line = self.lines.next_line().await.map_err(|e| SourceError::Io {
                channel: self.channel.clone(),
                source: e,
            })?;
            let Some(line) = line else {
                self.finish();
                return Ok(None);
            };
            self.line_no += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<NativeRecord>(line) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => {
                    self.malformed += 1;
                    debug!(channel = %self.channel, line = self.line_no, error = %e, "Skipping malformed export line");
                }
            }
        }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if self.malformed > 0 {
            warn!(
                channel = %self.channel,
                path = %self.path.display(),
                malformed = self.malformed,
                "Export contained malformed lines"
            );
        }
    }
}

enum Records {
    /// Oldest first, read lazily from the file.
    Streaming(ExportLines),
    /// Newest first, loaded at open.
    Buffered {
        total: u64,
        records: VecDeque<NativeRecord>,
    },
}

struct JsonlHandle {
    channel: String,
    records: Records,
}

#[async_trait]
impl ChannelHandle for JsonlHandle {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn record_count(&self) -> Option<u64> {
        match &self.records {
            Records::Streaming(_) => None,
            Records::Buffered { total, .. } => Some(*total),
        }
    }

    async fn read_batch(&mut self, max_count: usize) -> Result<Vec<NativeRecord>, SourceError> {
        match &mut self.records {
            Records::Streaming(lines) => {
                let mut batch = Vec::with_capacity(max_count.min(1024));
                while batch.len() < max_count {
                    match lines.next_record().await? {
                        Some(record) => batch.push(record),
                        None => break,
                    }
                }
                Ok(batch)
            }
            Records::Buffered { records, .. } => {
                let take = max_count.min(records.len());
                Ok(records.drain(..take).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::io::Write;
    use tempfile::TempDir;

    fn line(record_number: u64) -> String {
        let record = NativeRecord {
            record_number,
            event_id: 0x4000_1000 + record_number as u32,
            source_name: "Service Control Manager".to_string(),
            time_generated: Utc.timestamp_opt(1_700_000_000 + record_number as i64, 0).unwrap(),
            event_type: 4,
            event_category: 0,
            message_template: Some("Service %1 entered the running state.".to_string()),
            insertion_strings: vec!["Spooler".to_string()],
        };
        serde_json::to_string(&record).unwrap()
    }

    fn write_export(dir: &TempDir, channel: &str, numbers: &[u64], extra: &str) {
        let mut content: Vec<String> = numbers.iter().map(|n| line(*n)).collect();
        content.push(extra.to_string());
        std::fs::write(dir.path().join(export_file_name(channel)), content.join("\n")).unwrap();
    }

    async fn read_all(handle: &mut Box<dyn ChannelHandle>, chunk: usize) -> Vec<u64> {
        let mut seen = Vec::new();
        loop {
            let batch = handle.read_batch(chunk).await.unwrap();
            if batch.is_empty() {
                return seen;
            }
            assert!(batch.len() <= chunk);
            seen.extend(batch.iter().map(|r| r.record_number));
        }
    }

    #[tokio::test]
    async fn test_forwards_reads_file_order() {
        let dir = TempDir::new().unwrap();
        write_export(&dir, "System", &[1, 2, 3, 4, 5], "");

        let source = JsonlSource::new(dir.path(), ReadDirection::Forwards);
        let mut handle = source.open_channel("System").await.unwrap();

        assert_eq!(handle.channel(), "System");
        assert_eq!(handle.record_count(), None);
        assert_eq!(read_all(&mut handle, 2).await, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_forwards_streams_lines_appended_after_open() {
        let dir = TempDir::new().unwrap();
        write_export(&dir, "System", &[1, 2, 3], "");

        let source = JsonlSource::new(dir.path(), ReadDirection::Forwards);
        let mut handle = source.open_channel("System").await.unwrap();
        let first: Vec<u64> = handle.read_batch(2).await.unwrap().iter().map(|r| r.record_number).collect();
        assert_eq!(first, vec![1, 2]);

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(source.channel_path("System"))
            .unwrap();
        writeln!(file, "{}", line(4)).unwrap();

        assert_eq!(read_all(&mut handle, 8).await, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_backwards_reads_newest_first() {
        let dir = TempDir::new().unwrap();
        write_export(&dir, "Security", &[10, 11, 12], "");

        let source = JsonlSource::new(dir.path(), ReadDirection::Backwards);
        let mut handle = source.open_channel("Security").await.unwrap();
        assert_eq!(handle.record_count(), Some(3));
        assert_eq!(read_all(&mut handle, 10).await, vec![12, 11, 10]);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        write_export(&dir, "Application", &[1, 2], "{\"record_number\": \"oops\"}");

        let source = JsonlSource::new(dir.path(), ReadDirection::Forwards);
        let mut handle = source.open_channel("Application").await.unwrap();
        assert_eq!(read_all(&mut handle, 8).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_missing_channel_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let source = JsonlSource::new(dir.path(), ReadDirection::Forwards);

        match source.open_channel("Microsoft-Windows-PowerShell/Operational").await {
            Err(SourceError::ChannelUnavailable { channel, .. }) => {
                assert_eq!(channel, "Microsoft-Windows-PowerShell/Operational");
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected channel to be unavailable"),
        }
    }

    #[test]
    fn test_slash_in_channel_name_is_escaped() {
        assert_eq!(
            export_file_name("Microsoft-Windows-TaskScheduler/Operational"),
            "Microsoft-Windows-TaskScheduler%2FOperational.jsonl"
        );
    }
}
