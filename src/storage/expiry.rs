//! Optional Active Expiry
//!
//! Lazy expiry alone is correct: every read path already treats expired
//! objects as absent. What it does not do is free memory held by keys that
//! expire and are never touched again. The sweeper is a tokio task that
//! periodically calls [`StorageEngine::cleanup_expired`] to reclaim them.
//!
//! Since cleanup only removes objects that readers already cannot see,
//! running the sweeper never changes a reply.
//!
//! The interval adapts: it halves while a large share of keys is expiring and
//! doubles while almost nothing is.

use crate::storage::StorageEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Interval the sweeper starts with.
    pub base_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Speed up when more than this fraction of keys was evicted.
    pub speedup_threshold: f64,
    /// Slow down when less than this fraction of keys was evicted.
    pub slowdown_threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            speedup_threshold: 0.25,
            slowdown_threshold: 0.01,
        }
    }
}

/// Handle to a running sweeper. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper on the current tokio runtime.
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(sweeper_loop(engine, config, shutdown_rx));
        info!("Background expiry sweeper started");
        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Interval to use after a sweep that evicted `expired` out of `scanned`.
fn next_interval(config: &ExpiryConfig, current: Duration, expired: u64, scanned: u64) -> Duration {
    if scanned == 0 {
        return current;
    }

    let rate = expired as f64 / scanned as f64;
    if rate > config.speedup_threshold {
        (current / 2).max(config.min_interval)
    } else if rate < config.slowdown_threshold {
        (current * 2).min(config.max_interval)
    } else {
        current
    }
}

async fn sweeper_loop(
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper stopped");
                    return;
                }
            }
        }

        let scanned = engine.len();
        let expired = engine.cleanup_expired();
        let next = next_interval(&config, interval, expired, scanned);

        if next != interval {
            trace!(
                expired,
                scanned,
                interval_ms = next.as_millis() as u64,
                "Sweeper interval adjusted"
            );
            interval = next;
        }

        if expired > 0 {
            debug!(
                expired,
                keys_remaining = engine.len(),
                "Expired keys cleaned up"
            );
        }
    }
}

/// Starts a sweeper with [`ExpiryConfig::default`].
pub fn start_expiry_sweeper(engine: Arc<StorageEngine>) -> ExpirySweeper {
    ExpirySweeper::start(engine, ExpiryConfig::default())
}
