use auditfeed::cli::run::start_pipeline;
use auditfeed::collector::{Batch, ChannelCollector, LogRecord, Severity};
use auditfeed::config::parse::parse_config;
use auditfeed::config::types::{Config, WriterConfig};
use auditfeed::config::{DedupKey, ReadDirection};
use auditfeed::pipeline::{batch_queue, run_writer, PipelineContext, QueueItem};
use auditfeed::source::{JsonlSource, MemorySource, NativeRecord};
use auditfeed::storage::duckdb::DuckDbStorage;
use auditfeed::storage::{LogFilter, Storage, Watermark};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_714_000_000 + secs, 0).unwrap()
}

fn native(record_number: u64, event_id: u32, event_type: u16, secs: i64) -> NativeRecord {
    NativeRecord {
        record_number,
        event_id,
        source_name: "EventLog".to_string(),
        time_generated: at(secs),
        event_type,
        event_category: 0,
        message_template: Some("Event %1 recorded.".to_string()),
        insertion_strings: vec![record_number.to_string()],
    }
}

fn test_config() -> Config {
    parse_config(
        r#"
channels: [Security, System]
source:
  type: jsonl
  path: /unused
  direction: backwards
collector:
  batch_size: 10
  poll_interval: 50ms
  backoff: 50ms
sampler:
  sample_size: 10
  interval: 50ms
  recency_window: infinite
storage:
  path: /unused/logs.duckdb
"#,
    )
    .unwrap()
}

struct Stage {
    ctx: PipelineContext,
    writer: tokio::task::JoinHandle<()>,
    _shutdown: watch::Sender<bool>,
}

/// Collector-facing context with a writer draining the queue.
async fn stage(storage: Arc<dyn Storage>) -> Stage {
    storage.init_schema().await.unwrap();
    let (tx, rx) = batch_queue(4);
    let (shutdown, shutdown_rx) = watch::channel(false);
    let ctx = PipelineContext::new(storage, tx, shutdown_rx);
    ctx.watermarks.preload().await.unwrap();

    let writer_ctx = ctx.clone();
    let writer = tokio::spawn(async move {
        run_writer(rx, writer_ctx, WriterConfig::default()).await;
    });

    Stage {
        ctx,
        writer,
        _shutdown: shutdown,
    }
}

impl Stage {
    async fn finish(self) {
        self.ctx.queue.send(QueueItem::Shutdown).await.unwrap();
        self.writer.await.unwrap();
    }
}

fn collector(
    channel: &str,
    source: &MemorySource,
    ctx: &PipelineContext,
    config: &Config,
) -> ChannelCollector {
    ChannelCollector::new(
        channel,
        Arc::new(source.clone()),
        ctx.clone(),
        config.collector.clone(),
        &config.source,
    )
}

#[tokio::test]
async fn test_two_channel_scenario() {
    let config = test_config();
    let storage: Arc<dyn Storage> =
        Arc::new(DuckDbStorage::in_memory(DedupKey::RecordSequence).unwrap());
    let st = stage(storage.clone()).await;

    let source = MemorySource::new(ReadDirection::Backwards);
    source.push(
        "Security",
        [native(1, 4624, 8, 1), native(2, 4625, 16, 2), native(3, 4672, 8, 3)],
    );
    source.push("System", [native(1, 7036, 4, 4)]);

    let mut security = collector("Security", &source, &st.ctx, &config);
    let mut system = collector("System", &source, &st.ctx, &config);

    let first = security.poll_once().await.unwrap();
    assert_eq!((first.accepted, first.batches), (3, 1));
    let first = system.poll_once().await.unwrap();
    assert_eq!((first.accepted, first.batches), (1, 1));

    let ctx = st.ctx.clone();
    st.finish().await;

    assert_eq!(storage.count_logs(None).await.unwrap(), 4);
    assert_eq!(
        storage.load_watermark("Security").await.unwrap(),
        Some(Watermark::new(3, at(3)))
    );
    assert_eq!(
        storage.load_watermark("System").await.unwrap(),
        Some(Watermark::new(1, at(4)))
    );

    assert_eq!(security.poll_once().await.unwrap().accepted, 0);
    assert_eq!(system.poll_once().await.unwrap().accepted, 0);
    assert_eq!(ctx.stats.snapshot().batches_enqueued, 2);
}

#[tokio::test]
async fn test_restart_does_not_duplicate_rows() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("logs.duckdb");
    let config = test_config();

    let source = MemorySource::new(ReadDirection::Backwards);
    source.push("System", (1..=5).map(|n| native(n, 7036, 4, n as i64)));

    for round in 0..2 {
        let storage: Arc<dyn Storage> =
            Arc::new(DuckDbStorage::new(&db_path, DedupKey::RecordSequence, 1).unwrap());
        let st = stage(storage.clone()).await;

        let mut system = collector("System", &source, &st.ctx, &config);
        let report = system.poll_once().await.unwrap();
        assert_eq!(report.accepted, if round == 0 { 5 } else { 0 });

        st.finish().await;
        assert_eq!(storage.count_logs(Some("System")).await.unwrap(), 5);
    }
}

#[tokio::test]
async fn test_redelivery_keeps_latest_copy() {
    let storage: Arc<dyn Storage> =
        Arc::new(DuckDbStorage::in_memory(DedupKey::RecordSequence).unwrap());
    let st = stage(storage.clone()).await;

    let copy = |message: &str, severity: Severity| LogRecord {
        channel: "Application".to_string(),
        record_sequence: 42,
        event_code: 1000,
        raw_event_id: 1000,
        source_name: "Application Error".to_string(),
        time_generated: at(42),
        event_type: 1,
        event_category: 100,
        severity,
        message: message.to_string(),
    };

    st.ctx
        .queue
        .send(QueueItem::Batch(Batch::new("Application", 1, 0, vec![copy("first", Severity::Warning)])))
        .await
        .unwrap();
    st.ctx
        .queue
        .send(QueueItem::Batch(Batch::new("Application", 2, 1, vec![copy("second", Severity::Critical)])))
        .await
        .unwrap();
    st.finish().await;

    let rows = storage
        .query_logs(&LogFilter {
            limit: 10,
            ..LogFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].message, "second");
    assert_eq!(rows[0].severity, Severity::Critical);
}

#[tokio::test]
async fn test_jsonl_exports_feed_the_pipeline() {
    let dir = TempDir::new().unwrap();
    let channel = "Microsoft-Windows-PowerShell/Operational";
    let lines: Vec<String> = (1..=3)
        .map(|n| serde_json::to_string(&native(n, 4104, 3, n as i64)).unwrap())
        .collect();
    std::fs::write(
        dir.path().join("Microsoft-Windows-PowerShell%2FOperational.jsonl"),
        lines.join("\n"),
    )
    .unwrap();

    let mut config = test_config();
    config.source.path = dir.path().to_path_buf();

    let storage: Arc<dyn Storage> =
        Arc::new(DuckDbStorage::in_memory(DedupKey::RecordSequence).unwrap());
    let st = stage(storage.clone()).await;

    let source = Arc::new(JsonlSource::new(dir.path(), ReadDirection::Backwards));
    let mut powershell = ChannelCollector::new(
        channel,
        source,
        st.ctx.clone(),
        config.collector.clone(),
        &config.source,
    );
    assert_eq!(powershell.poll_once().await.unwrap().accepted, 3);
    st.finish().await;

    let rows = storage
        .query_logs(&LogFilter {
            channel: Some(channel.to_string()),
            limit: 10,
            ..LogFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.severity == Severity::Warning));
    assert_eq!(rows[0].message, "Event 3 recorded.");
}

#[tokio::test]
async fn test_running_pipeline_broadcasts_samples() {
    let config = test_config();
    let storage: Arc<dyn Storage> =
        Arc::new(DuckDbStorage::in_memory(DedupKey::RecordSequence).unwrap());

    let source = MemorySource::new(ReadDirection::Backwards);
    source.push("Security", (1..=20).map(|n| native(n, 4624, 8, n as i64)));
    source.push("System", (1..=20).map(|n| native(n, 7036, 1, n as i64)));

    let pipeline = start_pipeline(&config, Arc::new(source.clone()), storage.clone())
        .await
        .unwrap();
    let mut feed = pipeline.broadcaster().subscribe();

    let payload = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let payload = feed.next().await.unwrap();
            let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
            if value["data"].as_array().map_or(0, Vec::len) == 10 {
                return value;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(payload["event"], "log_update");
    let data = payload["data"].as_array().unwrap();
    for channel in ["Security", "System"] {
        let count = data.iter().filter(|r| r["channel"] == channel).count();
        assert!(count <= 5);
    }

    pipeline.shutdown().await.unwrap();
    assert_eq!(storage.count_logs(None).await.unwrap(), 40);
}

#[tokio::test]
async fn test_unavailable_channel_does_not_stop_others() {
    let config = test_config();
    let storage: Arc<dyn Storage> =
        Arc::new(DuckDbStorage::in_memory(DedupKey::RecordSequence).unwrap());

    let source = MemorySource::new(ReadDirection::Backwards);
    source.push("Security", [native(1, 4624, 8, 1)]);
    source.deny("Security", "access is denied");
    source.push("System", [native(1, 7036, 4, 1), native(2, 7036, 4, 2)]);

    let pipeline = start_pipeline(&config, Arc::new(source.clone()), storage.clone())
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        while storage.count_logs(Some("System")).await.unwrap() < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let status = pipeline
        .context()
        .stats
        .collector_status("Security")
        .unwrap();
    assert!(status.last_error.unwrap().contains("access is denied"));

    source.allow("Security");
    tokio::time::timeout(Duration::from_secs(10), async {
        while storage.count_logs(Some("Security")).await.unwrap() < 1 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    pipeline.shutdown().await.unwrap();
}
