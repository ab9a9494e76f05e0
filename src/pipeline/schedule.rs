use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};

/// Drives a polling loop: a fixed period, optional random jitter on top of
/// each tick, and early exit once the shutdown flag flips.
pub struct Ticker {
    interval: Interval,
    jitter: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Ticker {
    pub fn new(period: Duration, jitter: Duration, shutdown: watch::Receiver<bool>) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            jitter,
            shutdown,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Waits for the next tick. The first tick completes immediately.
    /// Returns `false` when shutdown was signalled instead.
    pub async fn tick(&mut self) -> bool {
        if self.is_shutdown() {
            return false;
        }

        tokio::select! {
            _ = self.interval.tick() => {}
            _ = self.shutdown.wait_for(|&stop| stop) => return false,
        }

        if self.jitter.is_zero() {
            return true;
        }
        let jitter_ms = self.jitter.as_millis().min(u64::MAX as u128) as u64;
        let extra = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        self.sleep(extra).await
    }

    /// Sleeps for `duration` unless shutdown arrives first.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_shutdown() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.shutdown.wait_for(|&stop| stop) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_follow_period() {
        let (_tx, rx) = watch::channel(false);
        let mut ticker = Ticker::new(Duration::from_secs(5), Duration::ZERO, rx);

        let start = Instant::now();
        assert!(ticker.tick().await);
        assert_eq!(start.elapsed(), Duration::ZERO);

        assert!(ticker.tick().await);
        assert!(ticker.tick().await);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_stays_within_bound() {
        let (_tx, rx) = watch::channel(false);
        let mut ticker = Ticker::new(Duration::from_secs(5), Duration::from_secs(1), rx);

        let start = Instant::now();
        assert!(ticker.tick().await);
        assert!(start.elapsed() <= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_wait() {
        let (tx, rx) = watch::channel(false);
        let mut ticker = Ticker::new(Duration::from_secs(60), Duration::ZERO, rx);
        assert!(ticker.tick().await);

        let handle = tokio::spawn(async move {
            let ticked = ticker.tick().await;
            let slept = ticker.sleep(Duration::from_secs(1)).await;
            (ticked, slept)
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), (false, false));
    }
}
