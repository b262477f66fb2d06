//! Interval-driven stale sweep.
//!
//! The sweep itself lives on the store (`JobStore::sweep`); this is the
//! timer that drives it for deployments without an external trigger.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::store::JobStore;

/// Sweeper configuration.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often to scan for stale jobs.
    pub interval: Duration,
    /// Claims older than this are presumed abandoned.
    pub stale_after: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(300),
        }
    }
}

/// Handle to a spawned sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    /// Request graceful shutdown and wait for the loop to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.join.await;
    }
}

/// Periodic lost-worker recovery.
pub struct Sweeper;

impl Sweeper {
    pub fn spawn(store: Arc<dyn JobStore>, config: SweeperConfig) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let join = tokio::spawn(async move {
            info!(
                interval_secs = config.interval.as_secs(),
                stale_after_secs = config.stale_after.as_secs(),
                "stale sweeper started"
            );

            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        match store.sweep(config.stale_after).await {
                            Ok(swept) if !swept.is_empty() => {
                                info!(count = swept.len(), "sweep reclaimed stale jobs");
                            }
                            Ok(_) => {}
                            Err(err) => error!(error = %err, "sweep failed"),
                        }
                    }
                }
            }

            info!("stale sweeper stopped");
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}
