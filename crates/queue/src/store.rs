//! Job store abstraction shared by the in-memory and Postgres backends.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::types::{FailOutcome, Job, JobId, JobSpec, JobStatus, SpecError, SweptJob};

/// Durable source of truth for job existence and state.
///
/// Every mutating operation is a single atomic conditional update keyed on
/// the job's expected current status. Transitions return `Ok(None)` when no
/// job satisfied the precondition, whether the id is unknown or the job is
/// in a different state; callers cannot tell the two apart, by contract.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert one job. Rejects empty `type` and out-of-bound priority.
    async fn create(&self, spec: JobSpec) -> Result<Job, JobStoreError>;

    /// Insert a batch atomically. Rejects empty batches; a single invalid
    /// spec rejects the whole batch.
    async fn create_batch(&self, specs: Vec<JobSpec>) -> Result<Vec<Job>, JobStoreError>;

    /// Non-mutating snapshot read.
    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// List jobs, optionally filtered by status, oldest first.
    async fn list(&self, filter: JobFilter) -> Result<JobPage, JobStoreError>;

    /// Atomically hand the best eligible pending job to `worker_id`.
    ///
    /// Selection is highest priority first, ties broken oldest first. Under
    /// concurrent callers at most one ever receives any given job; a claim
    /// contending on a row moves to the next candidate instead of blocking.
    async fn claim(
        &self,
        worker_id: &str,
        type_filter: Option<&str>,
    ) -> Result<Option<Job>, JobStoreError>;

    /// `claimed -> running`, stamping `started_at`.
    async fn start(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// `running -> completed`, storing the result payload.
    async fn complete(
        &self,
        id: JobId,
        result: Option<serde_json::Value>,
    ) -> Result<Option<Job>, JobStoreError>;

    /// Report a failed attempt from `running` or `claimed`.
    ///
    /// Increments `retries`; requeues to `pending` while retries remain,
    /// otherwise transitions to terminal `failed`.
    async fn fail(&self, id: JobId, error: &str) -> Result<Option<FailOutcome>, JobStoreError>;

    /// `pending`/`claimed` -> `cancelled`. A running job cannot be cancelled.
    async fn cancel(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Return jobs stuck in `claimed`/`running` past `stale_after` to
    /// `pending`, clearing the claimant fields. Retries are not incremented:
    /// lost-worker recovery is not a failed attempt.
    async fn sweep(&self, stale_after: Duration) -> Result<Vec<SweptJob>, JobStoreError>;

    /// Read-only aggregates over the store.
    async fn stats(&self) -> Result<QueueStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error(transparent)]
    Invalid(#[from] SpecError),
    #[error("batch must contain at least one job")]
    EmptyBatch,
    #[error("batch exceeds maximum size of {0}")]
    BatchTooLarge(usize),
    #[error("storage error in {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },
}

impl JobStoreError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }
}

/// Listing filter and pagination.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: Option<u32>,
    pub offset: u64,
}

/// One page of jobs plus the total matching count.
#[derive(Debug, Clone)]
pub struct JobPage {
    pub entries: Vec<Job>,
    pub total: u64,
}

/// Aggregate counts for observability.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub total: u64,
    pub pending: u64,
    pub claimed: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Counts grouped by `(type, status)`, ordered by type then status.
    pub by_type: Vec<TypeStatusCount>,
}

impl QueueStats {
    pub fn record(&mut self, status: JobStatus, count: u64) {
        self.total += count;
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Claimed => self.claimed += count,
            JobStatus::Running => self.running += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
            JobStatus::Cancelled => self.cancelled += count,
        }
    }
}

/// Count of jobs of one type in one status.
#[derive(Debug, Clone, Serialize)]
pub struct TypeStatusCount {
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub count: u64,
}
