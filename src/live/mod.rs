pub mod broadcaster;
pub mod sampler;

pub use broadcaster::{encode_snapshot, BroadcastError, Broadcaster, LiveRecord, Subscription};
pub use sampler::{channel_share, Sampler, Snapshot};

use crate::pipeline::Ticker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Samples the store every `interval` and publishes the result. Ticks with
/// no subscribers skip the query.
pub async fn run_live_feed(
    sampler: Sampler,
    broadcaster: Arc<Broadcaster>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) {
    let mut ticker = Ticker::new(interval, Duration::ZERO, shutdown);
    info!(interval = ?interval, "Live feed started");

    while ticker.tick().await {
        if broadcaster.subscriber_count() == 0 {
            continue;
        }

        let snapshot = match sampler.sample().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Snapshot sampling failed");
                continue;
            }
        };

        match broadcaster.publish(&snapshot) {
            Ok(subscribers) => debug!(
                records = snapshot.records.len(),
                subscribers,
                "Published snapshot"
            ),
            Err(e) => warn!(error = %e, "Failed to publish snapshot"),
        }
    }

    info!("Live feed stopped");
}
