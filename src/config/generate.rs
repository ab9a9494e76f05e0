pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# AUDITFEED CONFIGURATION
# =============================================================================
# Harvests audit/event records from log channels, stores them in DuckDB and
# pushes a channel-balanced live sample to WebSocket subscribers.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/auditfeed/config.yml
#   3. /etc/auditfeed/config.yml
#
# Paths may start with ~. Environment variables are referenced as $env
# followed by the variable name in braces.

# Channels to harvest. Omit to use the default Windows channel set
# (Application, Security, System and four Operational channels).
channels:
  - Application
  - Security
  - System

# =============================================================================
# SOURCE
# =============================================================================
source:
  # jsonl: one export file per channel, <path>/<channel>.jsonl, where '/' in a
  # channel name is written as %2F
  type: jsonl
  path: ~/.local/share/auditfeed/exports
  # backwards reads newest records first and stops at the watermark
  direction: backwards
  read_chunk: 256
  # Upper bound on a single open or read against a channel
  read_timeout: 10s

# =============================================================================
# COLLECTOR (one worker per channel)
# =============================================================================
collector:
  batch_size: 1000
  poll_interval: 5s
  # Wait after a failed cycle before the channel is tried again
  backoff: 10s
  jitter: 250ms
  max_records_per_cycle: 100000

pipeline:
  # Batches buffered between collectors and the writer; full queue blocks
  # collectors
  queue_capacity: 16

writer:
  # A batch failing this many times is logged and skipped
  max_attempts: 3
  retry_backoff: 500ms

# =============================================================================
# STORAGE
# =============================================================================
storage:
  path: ~/.local/share/auditfeed/logs.duckdb
  # record_sequence: one row per native record
  # raw_event_id: one row per (channel, event id), latest occurrence wins
  dedup_key: record_sequence
  reader_connections: 2

# =============================================================================
# LIVE FEED
# =============================================================================
sampler:
  sample_size: 1000
  interval: 5s
  # Only sample rows newer than this; 'infinite' disables the bound
  recency_window: 240h

web:
  listen: 127.0.0.1:5000
"#
    .to_string()
}
