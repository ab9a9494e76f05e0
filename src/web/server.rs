use axum::{routing::get, Router};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use super::api::{get_status, health_check, list_logs, AppState};
use super::live::live_feed;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(live_feed))
        .route("/api/logs", get(list_logs))
        .route("/api/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the web server and run it until shutdown is signalled
pub async fn run_server(
    state: AppState,
    listen: &str,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!("Web server listening on {}", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
            tracing::info!("Web server shutting down gracefully");
        })
        .await
}
