use super::traits::{ApplyOutcome, LogFilter, Storage, StorageError};
use super::watermark::Watermark;
use crate::collector::{Batch, LogRecord};
use crate::config::DedupKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::types::Value;
use duckdb::{params, params_from_iter, Connection, Transaction};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

const RECORD_COLUMNS: &str = "channel, record_sequence, raw_event_id, event_code, source, \
     epoch_us(time_generated), event_type, event_category, severity, message";

/// Check if a process with the given PID is still running
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        std::process::Command::new("ps")
            .arg("-p")
            .arg(pid.to_string())
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

/// Extract the holder PID from a DuckDB "Could not set lock" message
fn extract_pid_from_lock_error(error_msg: &str) -> Option<u32> {
    let start = error_msg.find("(PID ")? + 5;
    let end = error_msg[start..].find(')')?;
    error_msg[start..start + end].parse().ok()
}

fn remove_lock_files(db_path: &Path) -> std::io::Result<()> {
    for suffix in ["wal", "lock"] {
        let path = PathBuf::from(format!("{}.{}", db_path.display(), suffix));
        if path.exists() {
            std::fs::remove_file(&path)?;
            tracing::info!(path = %path.display(), "Removed stale database file");
        }
    }
    Ok(())
}

/// Opens a database file, clearing a lock left behind by a dead process.
fn open_with_lock_recovery(path: &Path) -> Result<Connection, StorageError> {
    let err = match Connection::open(path) {
        Ok(conn) => return Ok(conn),
        Err(e) => e,
    };

    let error_msg = err.to_string();
    if !error_msg.contains("Could not set lock") {
        return Err(err.into());
    }

    tracing::warn!(error = %error_msg, "Database lock detected");
    match extract_pid_from_lock_error(&error_msg) {
        Some(pid) if !is_process_running(pid) => {
            tracing::warn!(pid, "Lock holder is gone, removing stale lock files");
            remove_lock_files(path)
                .map_err(|e| StorageError::Database(format!("failed to remove lock files: {}", e)))?;
            Ok(Connection::open(path)?)
        }
        Some(pid) => {
            tracing::error!(pid, "Database is locked by a running process");
            Err(err.into())
        }
        None => Err(err.into()),
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock()
        .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
}

fn conversion_error(index: usize, reason: &str) -> duckdb::Error {
    duckdb::Error::FromSqlConversionFailure(
        index,
        duckdb::types::Type::BigInt,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            reason.to_string(),
        )),
    )
}

fn row_to_record(row: &duckdb::Row<'_>) -> duckdb::Result<LogRecord> {
    let micros: i64 = row.get(5)?;
    let severity: String = row.get(8)?;

    Ok(LogRecord {
        channel: row.get(0)?,
        record_sequence: row.get(1)?,
        raw_event_id: row.get(2)?,
        event_code: row.get(3)?,
        source_name: row.get(4)?,
        time_generated: DateTime::from_timestamp_micros(micros)
            .ok_or_else(|| conversion_error(5, "invalid timestamp"))?,
        event_type: row.get(6)?,
        event_category: row.get(7)?,
        severity: severity.parse().map_err(|e: String| conversion_error(8, &e))?,
        message: row.get(9)?,
    })
}

fn dedup_value(record: &LogRecord, key: DedupKey) -> u64 {
    match key {
        DedupKey::RecordSequence => record.record_sequence,
        DedupKey::RawEventId => u64::from(record.raw_event_id),
    }
}

/// Keeps the last record for each dedup key, preserving first-seen order.
/// Returns the survivors and how many records were collapsed.
fn latest_per_key(records: &[LogRecord], key: DedupKey) -> (Vec<&LogRecord>, usize) {
    let mut slots: HashMap<(&str, u64), usize> = HashMap::with_capacity(records.len());
    let mut survivors: Vec<&LogRecord> = Vec::with_capacity(records.len());

    for record in records {
        let k = (record.channel.as_str(), dedup_value(record, key));
        match slots.get(&k) {
            Some(&slot) => survivors[slot] = record,
            None => {
                slots.insert(k, survivors.len());
                survivors.push(record);
            }
        }
    }

    let collapsed = records.len() - survivors.len();
    (survivors, collapsed)
}

/// Delete-then-insert of the batch rows. Returns (inserted, replaced, collapsed).
fn write_rows(
    tx: &Transaction<'_>,
    records: &[LogRecord],
    key: DedupKey,
) -> Result<(usize, usize, usize), StorageError> {
    let (survivors, collapsed) = latest_per_key(records, key);
    let ingested_at = Utc::now().timestamp_micros();

    let delete_sql = match key {
        DedupKey::RecordSequence => "DELETE FROM logs WHERE channel = ? AND record_sequence = ?",
        DedupKey::RawEventId => "DELETE FROM logs WHERE channel = ? AND raw_event_id = ?",
    };

    let mut replaced = 0;
    {
        let mut delete = tx.prepare(delete_sql)?;
        for record in &survivors {
            replaced += delete.execute(params![record.channel, dedup_value(record, key)])?;
        }
    }

    {
        let mut insert = tx.prepare(
            "INSERT INTO logs (channel, record_sequence, raw_event_id, event_code, source, time_generated,
                               event_type, event_category, severity, message, ingested_at)
             VALUES (?, ?, ?, ?, ?, to_timestamp(? / 1000000.0), ?, ?, ?, ?, to_timestamp(? / 1000000.0))",
        )?;
        for record in &survivors {
            insert.execute(params![
                record.channel,
                record.record_sequence,
                record.raw_event_id,
                record.event_code,
                record.source_name,
                record.time_generated.timestamp_micros(),
                record.event_type,
                record.event_category,
                record.severity.as_str(),
                record.message,
                ingested_at,
            ])?;
        }
    }

    Ok((survivors.len(), replaced, collapsed))
}

fn read_watermark(conn: &Connection, channel: &str) -> Result<Option<Watermark>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT last_record_sequence, epoch_us(last_time_generated) FROM watermarks WHERE channel = ?",
    )?;
    let mut rows = stmt.query(params![channel])?;

    match rows.next()? {
        Some(row) => {
            let micros: i64 = row.get(1)?;
            let time = DateTime::from_timestamp_micros(micros).ok_or(StorageError::InvalidValue {
                column: "last_time_generated",
                reason: format!("{} is out of range", micros),
            })?;
            Ok(Some(Watermark::new(row.get(0)?, time)))
        }
        None => Ok(None),
    }
}

/// Moves the channel watermark forward to include `wm`; never backwards.
fn advance_watermark(
    tx: &Transaction<'_>,
    channel: &str,
    wm: Watermark,
) -> Result<Watermark, StorageError> {
    let now = Utc::now().timestamp_micros();

    match read_watermark(tx, channel)? {
        Some(existing) => {
            let merged = existing.merge(wm);
            tx.execute(
                "UPDATE watermarks
                 SET last_record_sequence = ?,
                     last_time_generated = to_timestamp(? / 1000000.0),
                     updated_at = to_timestamp(? / 1000000.0)
                 WHERE channel = ?",
                params![
                    merged.last_record_sequence,
                    merged.last_time_generated.timestamp_micros(),
                    now,
                    channel,
                ],
            )?;
            Ok(merged)
        }
        None => {
            tx.execute(
                "INSERT INTO watermarks (channel, last_record_sequence, last_time_generated, updated_at)
                 VALUES (?, ?, to_timestamp(? / 1000000.0), to_timestamp(? / 1000000.0))",
                params![
                    channel,
                    wm.last_record_sequence,
                    wm.last_time_generated.timestamp_micros(),
                    now,
                ],
            )?;
            Ok(wm)
        }
    }
}

/// DuckDB implementation of the Storage trait.
///
/// All writes go through a single writer connection. Reads are spread over a
/// small pool of connections to the same database; DuckDB's MVCC gives each
/// of them a consistent snapshot, so a reader never sees half a batch.
pub struct DuckDbStorage {
    writer: Arc<Mutex<Connection>>,
    readers: Arc<Vec<Mutex<Connection>>>,
    next_reader: AtomicUsize,
    dedup_key: DedupKey,
}

impl DuckDbStorage {
    /// Open (or create) a database file
    pub fn new<P: AsRef<Path>>(
        path: P,
        dedup_key: DedupKey,
        reader_connections: usize,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Database(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let conn = open_with_lock_recovery(path)?;
        Self::from_connection(conn, dedup_key, reader_connections)
    }

    /// Create an in-memory DuckDB storage instance (for testing)
    pub fn in_memory(dedup_key: DedupKey) -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?, dedup_key, 2)
    }

    fn from_connection(
        conn: Connection,
        dedup_key: DedupKey,
        reader_connections: usize,
    ) -> Result<Self, StorageError> {
        let readers = (0..reader_connections.max(1))
            .map(|_| conn.try_clone().map(Mutex::new))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            writer: Arc::new(Mutex::new(conn)),
            readers: Arc::new(readers),
            next_reader: AtomicUsize::new(0),
            dedup_key,
        })
    }

    async fn with_reader<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let readers = self.readers.clone();
        let index = self.next_reader.fetch_add(1, Ordering::Relaxed) % readers.len();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&readers[index])?;
            f(&conn)
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }
}

#[async_trait]
impl Storage for DuckDbStorage {
    async fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.writer.clone();
        let dedup_index = match self.dedup_key {
            DedupKey::RecordSequence => {
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_logs_unique_sequence ON logs(channel, record_sequence)"
            }
            DedupKey::RawEventId => {
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_logs_unique_event_id ON logs(channel, raw_event_id)"
            }
        };

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS logs (
                    channel VARCHAR NOT NULL,
                    record_sequence UBIGINT NOT NULL,
                    raw_event_id UINTEGER NOT NULL,
                    event_code USMALLINT NOT NULL,
                    source VARCHAR NOT NULL,
                    time_generated TIMESTAMPTZ NOT NULL,
                    event_type USMALLINT NOT NULL,
                    event_category USMALLINT NOT NULL,
                    severity VARCHAR NOT NULL,
                    message VARCHAR NOT NULL,
                    ingested_at TIMESTAMPTZ NOT NULL
                )",
                [],
            )?;

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_logs_time ON logs(time_generated)",
                [],
            )?;

            conn.execute(dedup_index, [])?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS watermarks (
                    channel VARCHAR PRIMARY KEY,
                    last_record_sequence UBIGINT NOT NULL,
                    last_time_generated TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                )",
                [],
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    async fn apply_batch(&self, batch: &Batch) -> Result<ApplyOutcome, StorageError> {
        let conn = self.writer.clone();
        let batch = batch.clone();
        let key = self.dedup_key;

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;

            let (inserted, replaced, collapsed) = write_rows(&tx, &batch.records, key)?;
            let watermark = match batch.watermark() {
                Some(wm) => Some(advance_watermark(&tx, &batch.channel, wm)?),
                None => None,
            };

            tx.commit()?;

            Ok(ApplyOutcome {
                inserted,
                replaced,
                collapsed,
                watermark,
            })
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    async fn load_watermark(&self, channel: &str) -> Result<Option<Watermark>, StorageError> {
        let channel = channel.to_string();
        self.with_reader(move |conn| read_watermark(conn, &channel)).await
    }

    async fn load_watermarks(&self) -> Result<HashMap<String, Watermark>, StorageError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT channel, last_record_sequence, epoch_us(last_time_generated) FROM watermarks",
            )?;
            let rows = stmt.query_map([], |row| {
                let micros: i64 = row.get(2)?;
                let time = DateTime::from_timestamp_micros(micros)
                    .ok_or_else(|| conversion_error(2, "invalid timestamp"))?;
                Ok((row.get::<_, String>(0)?, Watermark::new(row.get(1)?, time)))
            })?;

            let mut watermarks = HashMap::new();
            for row in rows {
                let (channel, wm) = row?;
                watermarks.insert(channel, wm);
            }
            Ok(watermarks)
        })
        .await
    }

    async fn sample_channel(
        &self,
        channel: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LogRecord>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut sql = format!("SELECT {} FROM logs WHERE channel = ?", RECORD_COLUMNS);
        let mut values = vec![Value::Text(channel.to_string())];
        if let Some(since) = since {
            sql.push_str(" AND time_generated >= to_timestamp(? / 1000000.0)");
            values.push(Value::BigInt(since.timestamp_micros()));
        }
        sql.push_str(" ORDER BY random() LIMIT ?");
        values.push(Value::BigInt(limit as i64));

        self.with_reader(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), row_to_record)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn query_logs(&self, filter: &LogFilter) -> Result<Vec<LogRecord>, StorageError> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(channel) = &filter.channel {
            clauses.push("channel = ?");
            values.push(Value::Text(channel.clone()));
        }
        if let Some(severity) = filter.severity {
            clauses.push("severity = ?");
            values.push(Value::Text(severity.as_str().to_string()));
        }
        if let Some(since) = filter.since {
            clauses.push("time_generated >= to_timestamp(? / 1000000.0)");
            values.push(Value::BigInt(since.timestamp_micros()));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM logs{} ORDER BY time_generated DESC, record_sequence DESC LIMIT ?",
            RECORD_COLUMNS, where_clause
        );
        values.push(Value::BigInt(filter.limit as i64));

        self.with_reader(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), row_to_record)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn count_logs(&self, channel: Option<&str>) -> Result<u64, StorageError> {
        let channel = channel.map(str::to_string);
        self.with_reader(move |conn| {
            let count: i64 = match channel {
                Some(channel) => conn.query_row(
                    "SELECT COUNT(*) FROM logs WHERE channel = ?",
                    params![channel],
                    |row| row.get(0),
                )?,
                None => conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?,
            };
            Ok(count.max(0) as u64)
        })
        .await
    }
}
