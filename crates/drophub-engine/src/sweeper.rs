//! # Expiry Sweeper
//!
//! Background task that periodically moves stale work into terminal
//! states: TTL'd commands to `expired`, packages stuck past the sync
//! window to `failed`, plus retention pruning.
//!
//! ## Why a Sweep at All
//! The hub cannot cancel anything on a device - there is no connection to
//! reach into. TTL expiry is the *only* timeout mechanism in the system,
//! and it runs here. The sweep reuses the coordinator's CAS transitions,
//! so it contends with live completions exactly like another device
//! request would: one of them wins the compare-and-set, the other
//! observes the result.
//!
//! ## Lifecycle
//! ```text
//! let (sweeper, handle) = ExpirySweeper::new(coordinator, interval);
//! tokio::spawn(sweeper.run());
//! ...
//! handle.shutdown().await?;   // graceful stop
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::coordinator::DeviceCoordinator;
use crate::error::{HubError, HubResult};

// =============================================================================
// Expiry Sweeper
// =============================================================================

/// Periodic expiry/retention sweeper.
pub struct ExpirySweeper {
    /// The coordination facade the sweep runs through.
    coordinator: Arc<DeviceCoordinator>,

    /// Time between passes.
    interval: Duration,

    /// Shutdown receiver.
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling the sweeper.
#[derive(Clone)]
pub struct SweeperHandle {
    /// Shutdown sender.
    shutdown_tx: mpsc::Sender<()>,
}

impl SweeperHandle {
    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> HubResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| HubError::ChannelError("Sweeper shutdown channel closed".to_string()))
    }
}

impl ExpirySweeper {
    /// Creates a new sweeper and returns a handle.
    pub fn new(coordinator: Arc<DeviceCoordinator>, interval: Duration) -> (Self, SweeperHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let sweeper = ExpirySweeper {
            coordinator,
            interval,
            shutdown_rx,
        };

        let handle = SweeperHandle { shutdown_tx };

        (sweeper, handle)
    }

    /// Runs the sweep loop.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "Expiry sweeper starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.coordinator.run_expiry_sweep().await {
                        Ok(report) => {
                            debug!(
                                commands_expired = report.commands_expired,
                                packages_failed = report.packages_failed,
                                rows_pruned = report.rows_pruned,
                                "Sweep pass complete"
                            );
                        }
                        Err(e) => {
                            error!(?e, "Expiry sweep failed");
                        }
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Expiry sweeper shutting down");
                    break;
                }
            }
        }

        info!("Expiry sweeper stopped");
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use drophub_db::{Database, DbConfig};

    #[tokio::test]
    async fn test_sweeper_shuts_down_on_handle() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let coordinator =
            Arc::new(DeviceCoordinator::new(db, HubConfig::default()).unwrap());

        let (sweeper, handle) = ExpirySweeper::new(coordinator, Duration::from_millis(10));
        let task = tokio::spawn(sweeper.run());

        // Let it tick at least once, then stop it
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.shutdown().await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("sweeper must stop after shutdown")
            .unwrap();
    }
}
