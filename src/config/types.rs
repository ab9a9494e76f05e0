use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Channels harvested when the config does not list any.
pub const DEFAULT_CHANNELS: &[&str] = &[
    "Application",
    "Security",
    "System",
    "Microsoft-Windows-PowerShell/Operational",
    "Microsoft-Windows-TaskScheduler/Operational",
    "Microsoft-Windows-WindowsUpdateClient/Operational",
    "Microsoft-Windows-WMI-Activity/Operational",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub channels: Vec<String>,
    pub source: SourceConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub path: PathBuf,
    #[serde(default = "default_direction")]
    pub direction: ReadDirection,
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
    #[serde(default = "default_read_timeout", with = "duration")]
    pub read_timeout: Duration,
}

fn default_direction() -> ReadDirection {
    ReadDirection::Backwards
}

fn default_read_chunk() -> usize {
    256
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// One JSON-lines export file per channel
    Jsonl,
}

/// Order in which a channel hands out its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadDirection {
    /// Oldest record first
    Forwards,
    /// Newest record first
    Backwards,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_poll_interval", with = "duration")]
    pub poll_interval: Duration,
    #[serde(default = "default_backoff", with = "duration")]
    pub backoff: Duration,
    #[serde(default, with = "duration")]
    pub jitter: Duration,
    #[serde(default = "default_max_records_per_cycle")]
    pub max_records_per_cycle: usize,
}

fn default_batch_size() -> usize {
    1000
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff() -> Duration {
    Duration::from_secs(10)
}

fn default_max_records_per_cycle() -> usize {
    100_000
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval: default_poll_interval(),
            backoff: default_backoff(),
            jitter: Duration::ZERO,
            max_records_per_cycle: default_max_records_per_cycle(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    16
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff", with = "duration")]
    pub retry_backoff: Duration,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> Duration {
    Duration::from_millis(500)
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff: default_retry_backoff(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub dedup_key: DedupKey,
    #[serde(default = "default_reader_connections")]
    pub reader_connections: usize,
}

fn default_reader_connections() -> usize {
    2
}

/// Attribute tuple whose uniqueness the store enforces.
///
/// The two policies are not interchangeable: native record sequences are
/// unique per channel, raw event ids repeat whenever the same kind of event
/// fires twice. `raw_event_id` therefore keeps only the latest occurrence of
/// each event id per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupKey {
    #[default]
    RecordSequence,
    RawEventId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default = "default_sample_interval", with = "duration")]
    pub interval: Duration,
    #[serde(default = "default_recency_window", with = "duration_format")]
    pub recency_window: Option<Duration>,
}

fn default_sample_size() -> usize {
    1000
}

fn default_sample_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_recency_window() -> Option<Duration> {
    Some(Duration::from_secs(10 * 24 * 3600))
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            interval: default_sample_interval(),
            recency_window: default_recency_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:5000".to_string()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Duration strings such as `500ms`, `5s`, `10m`, `240h`.
mod duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration string".to_string());
        }

        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in duration: {}", s))?;
        let (value_str, unit) = s.split_at(split);

        let value: u64 = value_str
            .parse()
            .map_err(|_| format!("invalid numeric value: {}", value_str))?;

        match unit {
            "ms" => Ok(Duration::from_millis(value)),
            "s" => Ok(Duration::from_secs(value)),
            "m" => Ok(Duration::from_secs(value * 60)),
            "h" => Ok(Duration::from_secs(value * 3600)),
            _ => Err(format!("invalid duration format: {}", s)),
        }
    }

    pub(super) fn format_duration(d: Duration) -> String {
        let secs = d.as_secs();
        if d.subsec_millis() != 0 || secs == 0 {
            format!("{}ms", d.as_millis())
        } else if secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }
}

/// Optional durations; `infinite` means no bound.
mod duration_format {
    use super::duration::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&format_duration(*d)),
            None => serializer.serialize_str("infinite"),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.trim() == "infinite" {
            Ok(None)
        } else {
            parse_duration(&s)
                .map(Some)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::duration::{format_duration, parse_duration};
    use std::time::Duration;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration(" 240h ").unwrap(), Duration::from_secs(864_000));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn test_format_duration_picks_largest_unit() {
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m");
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::ZERO), "0ms");
    }
}
