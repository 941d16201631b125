//! Background TTL sweeper.
//!
//! Lazy expiration only reclaims keys that something touches; a key that
//! expires and is never accessed again would otherwise sit in memory
//! forever. The sweeper is a background task that periodically drops every
//! expired entry.
//!
//! The sweep interval adapts: when a large fraction of the keyspace turns
//! out to be expired the interval halves, and when sweeps keep coming back
//! empty it doubles, bounded by the configured min/max. Command semantics
//! never depend on the sweeper running.

use crate::storage::StorageEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Sweeper tuning knobs.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Starting interval between sweeps.
    pub base_interval: Duration,
    /// Floor for the adaptive interval.
    pub min_interval: Duration,
    /// Ceiling for the adaptive interval.
    pub max_interval: Duration,
    /// Halve the interval when at least this fraction of keys expired.
    pub speedup_threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            speedup_threshold: 0.25,
        }
    }
}

/// Handle to the running sweeper task. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper over `engine`.
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(sweeper_loop(engine, config, shutdown_rx));
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

async fn sweeper_loop(
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("expiry sweeper stopping");
                    return;
                }
            }
        }

        let keys_before = engine.len();
        let reclaimed = engine.cleanup_expired();

        if keys_before > 0 && reclaimed as f64 / keys_before as f64 > config.speedup_threshold {
            interval = (interval / 2).max(config.min_interval);
            debug!(
                reclaimed,
                interval_ms = interval.as_millis() as u64,
                "high expiry rate, sweeping faster"
            );
        } else if reclaimed == 0 {
            interval = (interval * 2).min(config.max_interval);
            trace!(
                interval_ms = interval.as_millis() as u64,
                "nothing to reclaim, backing off"
            );
        }

        if reclaimed > 0 {
            debug!(reclaimed, remaining = engine.len(), "expired keys reclaimed");
        }
    }
}

/// Starts the sweeper with default configuration.
pub fn start_expiry_sweeper(engine: Arc<StorageEngine>) -> ExpirySweeper {
    ExpirySweeper::start(engine, ExpiryConfig::default())
}
