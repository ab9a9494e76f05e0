use auditfeed::config::types::SourceType;
use auditfeed::config::{generate::generate_starter_config, load_config, ConfigError, DedupKey};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_generated_config_is_valid() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    fs::write(&config_path, generate_starter_config()).unwrap();

    let config = load_config(&config_path).expect("Generated config should be valid");

    assert_eq!(config.channels, vec!["Application", "Security", "System"]);
    assert_eq!(config.source.source_type, SourceType::Jsonl);
    assert_eq!(config.collector.jitter, Duration::from_millis(250));
    assert_eq!(config.writer.max_attempts, 3);
    assert_eq!(config.storage.dedup_key, DedupKey::RecordSequence);
    assert_eq!(config.sampler.interval, Duration::from_secs(5));
    // ~ is expanded
    assert!(!config.storage.path.starts_with("~"));
}

#[test]
fn test_env_vars_expand_in_paths() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    std::env::set_var("AUDITFEED_TEST_EXPORTS", "/srv/exports");
    fs::write(
        &config_path,
        r#"
channels: [System]
source:
  type: jsonl
  path: $env{AUDITFEED_TEST_EXPORTS}/windows
storage:
  path: /tmp/auditfeed.duckdb
  dedup_key: raw_event_id
"#,
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.source.path.to_str(), Some("/srv/exports/windows"));
    assert_eq!(config.storage.dedup_key, DedupKey::RawEventId);
}

#[test]
fn test_missing_file_is_io_error() {
    let temp_dir = TempDir::new().unwrap();
    let result = load_config(&temp_dir.path().join("absent.yml"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

#[test]
fn test_zero_poll_interval_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    fs::write(
        &config_path,
        r#"
source:
  type: jsonl
  path: /tmp/exports
collector:
  poll_interval: 0s
storage:
  path: /tmp/auditfeed.duckdb
"#,
    )
    .unwrap();

    match load_config(&config_path) {
        Err(ConfigError::ValidationList(errors)) => {
            assert!(errors.iter().any(|e| e.contains("collector.poll_interval")));
        }
        other => panic!("expected validation error, got {:?}", other.map(|_| ())),
    }
}
