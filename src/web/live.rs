use crate::live::{BroadcastError, Subscription};
use crate::web::api::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use tokio::sync::watch;
use tracing::debug;

/// GET /ws
pub async fn live_feed(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let feed = state.broadcaster.subscribe();
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| forward_feed(socket, feed, shutdown))
}

/// Pushes every published snapshot to one client until it goes away.
/// Anything the client sends is ignored.
async fn forward_feed(
    mut socket: WebSocket,
    mut feed: Subscription,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Live feed subscriber connected");

    loop {
        tokio::select! {
            payload = feed.next() => {
                let Some(payload) = payload else { break };
                if let Err(e) = socket.send(Message::Text(payload.to_string())).await {
                    let err = BroadcastError::SubscriberUnreachable { reason: e.to_string() };
                    debug!(error = %err, "Dropping live feed subscriber");
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = async { let _ = shutdown.wait_for(|&stop| stop).await; } => break,
        }
    }

    debug!("Live feed subscriber disconnected");
}
