use crate::collector::Severity;
use crate::live::{Broadcaster, LiveRecord};
use crate::pipeline::{PipelineStats, StatsSnapshot};
use crate::storage::{LogFilter, Storage, Watermark, WatermarkStore};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

const MAX_LOG_LIMIT: usize = 1000;

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub watermarks: Arc<WatermarkStore>,
    pub stats: Arc<PipelineStats>,
    pub broadcaster: Arc<Broadcaster>,
    pub started: Instant,
    pub shutdown: watch::Receiver<bool>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub channel: Option<String>,
    pub severity: Option<String>,
    pub since: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<LiveRecord>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub uptime_seconds: u64,
    pub subscribers: usize,
    pub watermarks: BTreeMap<String, Watermark>,
    pub pipeline: StatsSnapshot,
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// GET /api/logs?channel=&severity=&since=&limit=
/// Most recent records first.
pub async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    let severity = query
        .severity
        .as_deref()
        .map(str::parse::<Severity>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let filter = LogFilter {
        channel: query.channel,
        severity,
        since: query.since,
        limit: query.limit.clamp(1, MAX_LOG_LIMIT),
    };

    let logs: Vec<LiveRecord> = state
        .storage
        .query_logs(&filter)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?
        .iter()
        .map(LiveRecord::from)
        .collect();

    Ok(Json(LogsResponse {
        count: logs.len(),
        logs,
    }))
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        uptime_seconds: state.started.elapsed().as_secs(),
        subscribers: state.broadcaster.subscriber_count(),
        watermarks: state.watermarks.snapshot().await.into_iter().collect(),
        pipeline: state.stats.snapshot(),
    })
}

// Error handling
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
