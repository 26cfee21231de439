//! Background Index Reaper
//!
//! Deferred eviction tasks live only in memory. If the process stops before
//! a task fires, its record would stay forever. The reaper closes that gap by
//! periodically scanning the token index and expiring any entry whose token
//! is older than `ttl + grace`.
//!
//! Reaping goes through [`ExpiryCoordinator::run_expiry`], so the token fence
//! and the per-key lock apply exactly as they do for a regular task. The
//! grace period keeps the reaper from racing tasks that are about to fire.

use crate::coordinator::{ExpiryCoordinator, ExpiryOutcome};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Pause between scans (default: 30s)
    pub interval: Duration,

    /// Extra age beyond the TTL before an entry counts as orphaned (default: 5s)
    pub grace: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            grace: Duration::from_secs(5),
        }
    }
}

/// Handle to the running reaper; dropping it stops the task.
#[derive(Debug)]
pub struct IndexReaper {
    shutdown_tx: watch::Sender<bool>,
}

impl IndexReaper {
    pub fn start(coordinator: ExpiryCoordinator, config: SweepConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            interval_ms = config.interval.as_millis() as u64,
            grace_ms = config.grace.as_millis() as u64,
            "Index reaper started"
        );
        tokio::spawn(reaper_loop(coordinator, config, shutdown_rx));

        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!("Index reaper stopped");
        }
    }
}

impl Drop for IndexReaper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn reaper_loop(
    coordinator: ExpiryCoordinator,
    config: SweepConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let threshold = coordinator.config().ttl + config.grace;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Index reaper received shutdown signal");
                    return;
                }
            }
        }

        let reaped = reap_once(&coordinator, threshold).await;
        if reaped > 0 {
            debug!(reaped = reaped, "Orphaned records reaped");
        }
    }
}

/// Expires every index entry older than `threshold`; returns how many
/// records were removed.
pub async fn reap_once(coordinator: &ExpiryCoordinator, threshold: Duration) -> usize {
    let entries = match coordinator.store().index_entries().await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "Index scan failed");
            return 0;
        }
    };

    let mut reaped = 0;
    for (key, token) in entries {
        if token.age() < threshold {
            continue;
        }
        if let ExpiryOutcome::Expired { .. } = coordinator.run_expiry(&key, token).await {
            reaped += 1;
        }
    }
    reaped
}

/// Starts the reaper with the default interval and grace period.
pub fn start_index_reaper(coordinator: ExpiryCoordinator) -> IndexReaper {
    IndexReaper::start(coordinator, SweepConfig::default())
}
