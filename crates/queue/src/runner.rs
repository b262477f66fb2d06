//! Pull-based worker loop: claim, start, execute, report.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::store::{JobStore, JobStoreError};
use crate::types::Job;

/// Job handler function type.
///
/// The returned payload becomes the job's `result`; an error becomes the
/// failure message reported back to the queue.
pub type JobHandler =
    Box<dyn Fn(&Job) -> anyhow::Result<Option<serde_json::Value>> + Send + Sync>;

/// Job runner configuration.
#[derive(Debug, Clone)]
pub struct JobRunnerConfig {
    /// Claimant identity recorded on every job this runner takes.
    pub worker_id: String,
    /// How long to sleep when a poll finds no work.
    pub poll_interval: Duration,
    /// When set, only jobs of this type are claimed.
    pub type_filter: Option<String>,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker-1".to_string(),
            poll_interval: Duration::from_millis(250),
            type_filter: None,
        }
    }
}

/// Handle to a spawned runner.
#[derive(Debug)]
pub struct JobRunnerHandle {
    shutdown: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl JobRunnerHandle {
    /// Request graceful shutdown and wait for the loop to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.join.await;
    }
}

/// Background job runner.
///
/// Repeatedly polls `claim`, executes the job with the handler registered
/// for its type, and reports `complete` or `fail`. Workers pull; the queue
/// never pushes.
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    handlers: HashMap<String, JobHandler>,
}

impl JobRunner {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a job type.
    ///
    /// Patterns: an exact type name, a `"prefix.*"` category, or `"*"` as a
    /// catch-all.
    pub fn register_handler<F>(&mut self, type_pattern: impl Into<String>, handler: F)
    where
        F: Fn(&Job) -> anyhow::Result<Option<serde_json::Value>> + Send + Sync + 'static,
    {
        self.handlers.insert(type_pattern.into(), Box::new(handler));
    }

    fn handler_for(&self, job_type: &str) -> Option<&JobHandler> {
        if let Some(h) = self.handlers.get(job_type) {
            return Some(h);
        }

        // Category match, e.g. "citations.*" matches "citations.verify".
        for (pattern, handler) in &self.handlers {
            if let Some(prefix) = pattern.strip_suffix(".*") {
                if job_type.starts_with(prefix) {
                    return Some(handler);
                }
            }
        }

        self.handlers.get("*")
    }

    /// Claim and execute at most one job.
    ///
    /// Returns `Ok(true)` when a job was claimed (whether or not it
    /// succeeded) and `Ok(false)` when the queue had nothing eligible.
    pub async fn run_one(&self, config: &JobRunnerConfig) -> Result<bool, JobStoreError> {
        let Some(claimed) = self
            .store
            .claim(&config.worker_id, config.type_filter.as_deref())
            .await?
        else {
            return Ok(false);
        };

        debug!(
            worker = %config.worker_id,
            job_id = %claimed.id,
            job_type = %claimed.job_type,
            "claimed job"
        );

        let Some(job) = self.store.start(claimed.id).await? else {
            // Cancelled or swept between claim and start; nothing to execute.
            warn!(job_id = %claimed.id, "claimed job was gone before start");
            return Ok(true);
        };

        let Some(handler) = self.handler_for(&job.job_type) else {
            let msg = format!("no handler for job type '{}'", job.job_type);
            warn!(job_id = %job.id, job_type = %job.job_type, "no handler registered");
            self.store.fail(job.id, &msg).await?;
            return Ok(true);
        };

        match handler(&job) {
            Ok(result) => {
                self.store.complete(job.id, result).await?;
                debug!(job_id = %job.id, "job completed");
            }
            Err(err) => {
                let outcome = self.store.fail(job.id, &format!("{err:#}")).await?;
                match outcome {
                    Some(o) if o.retried => {
                        debug!(job_id = %job.id, retries = o.job.retries, "job requeued")
                    }
                    Some(o) => {
                        warn!(job_id = %job.id, retries = o.job.retries, "job failed terminally")
                    }
                    None => {}
                }
            }
        }

        Ok(true)
    }

    /// Spawn the runner as a background task.
    pub fn spawn(self, config: JobRunnerConfig) -> JobRunnerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let join = tokio::spawn(runner_loop(self, config, shutdown_rx));
        JobRunnerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

async fn runner_loop(
    runner: JobRunner,
    config: JobRunnerConfig,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    info!(worker = %config.worker_id, "job runner started");

    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        match runner.run_one(&config).await {
            // More work may be waiting; poll again immediately.
            Ok(true) => {}
            Ok(false) => tokio::time::sleep(config.poll_interval).await,
            Err(err) => {
                error!(worker = %config.worker_id, error = %err, "failed to process job");
                tokio::time::sleep(config.poll_interval).await;
            }
        }
    }

    info!(worker = %config.worker_id, "job runner stopped");
}
