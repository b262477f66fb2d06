//! Core job types and creation limits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default retry ceiling for jobs that don't specify one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Unique job identifier, assigned monotonically by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(JobId)
    }
}

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be claimed
    Pending,
    /// Handed to exactly one worker, not yet started
    Claimed,
    /// Currently being executed
    Running,
    /// Completed successfully
    Completed,
    /// Failed with retries exhausted
    Failed,
    /// Cancelled before execution
    Cancelled,
}

impl JobStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Claimed => "claimed",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "claimed" => Some(JobStatus::Claimed),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of asynchronous work.
///
/// The queue treats `job_type` as an opaque routing tag and `params`/`result`
/// as opaque payloads; only workers interpret them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Work-kind tag, used for worker routing/filtering
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub params: Option<serde_json::Value>,
    /// Set only on `completed`
    pub result: Option<serde_json::Value>,
    /// Last failure message; survives a requeue for diagnostics
    pub error: Option<String>,
    /// Higher claims first
    pub priority: i32,
    /// Failed attempts so far
    pub retries: u32,
    pub max_retries: u32,
    /// Identity of the current/last claimant
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Specification for a job to be enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(rename = "type")]
    pub job_type: String,
    pub params: Option<serde_json::Value>,
    pub priority: i32,
    pub max_retries: u32,
}

impl JobSpec {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            params: None,
            priority: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Check the spec against creation limits.
    pub fn validate(&self, limits: &QueueLimits) -> Result<(), SpecError> {
        if self.job_type.trim().is_empty() {
            return Err(SpecError::EmptyType);
        }
        if self.priority < limits.min_priority || self.priority > limits.max_priority {
            return Err(SpecError::PriorityOutOfRange {
                priority: self.priority,
                min: limits.min_priority,
                max: limits.max_priority,
            });
        }
        Ok(())
    }
}

/// Why a job spec was rejected at creation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error("job type must not be empty")]
    EmptyType,
    #[error("priority {priority} outside allowed range [{min}, {max}]")]
    PriorityOutOfRange { priority: i32, min: i32, max: i32 },
}

/// Bounds enforced at creation and listing.
#[derive(Debug, Clone)]
pub struct QueueLimits {
    pub min_priority: i32,
    pub max_priority: i32,
    /// Ceiling for the list `limit` parameter; larger requests are clamped.
    pub max_list_limit: u32,
    pub default_list_limit: u32,
    pub max_batch: usize,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            min_priority: -100,
            max_priority: 100,
            max_list_limit: 200,
            default_list_limit: 50,
            max_batch: 100,
        }
    }
}

/// Result of reporting a failure: the updated job, and whether it was
/// requeued (`true`) or terminally failed (`false`).
#[derive(Debug, Clone)]
pub struct FailOutcome {
    pub job: Job,
    pub retried: bool,
}

/// A job reclaimed by the stale sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweptJob {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults() {
        let spec = JobSpec::new("verify_citation");
        assert_eq!(spec.priority, 0);
        assert_eq!(spec.max_retries, DEFAULT_MAX_RETRIES);
        assert!(spec.params.is_none());
    }

    #[test]
    fn validate_rejects_empty_type() {
        let limits = QueueLimits::default();
        assert_eq!(
            JobSpec::new("").validate(&limits),
            Err(SpecError::EmptyType)
        );
        assert_eq!(
            JobSpec::new("   ").validate(&limits),
            Err(SpecError::EmptyType)
        );
    }

    #[test]
    fn validate_rejects_out_of_range_priority() {
        let limits = QueueLimits::default();
        let spec = JobSpec::new("regrade_page").with_priority(limits.max_priority + 1);
        assert!(matches!(
            spec.validate(&limits),
            Err(SpecError::PriorityOutOfRange { .. })
        ));
        let spec = JobSpec::new("regrade_page").with_priority(limits.min_priority);
        assert!(spec.validate(&limits).is_ok());
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Claimed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn status_wire_names_round_trip() {
        for s in [
            JobStatus::Pending,
            JobStatus::Claimed,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(JobStatus::parse("resurrected"), None);
    }

    #[test]
    fn job_serializes_with_spec_field_names() {
        let job = Job {
            id: JobId(7),
            job_type: "verify_citation".to_string(),
            status: JobStatus::Pending,
            params: Some(serde_json::json!({"citation_id": 42})),
            result: None,
            error: None,
            priority: 5,
            retries: 0,
            max_retries: 3,
            worker_id: None,
            created_at: Utc::now(),
            claimed_at: None,
            started_at: None,
            completed_at: None,
        };

        let v = serde_json::to_value(&job).unwrap();
        assert_eq!(v["id"], 7);
        assert_eq!(v["type"], "verify_citation");
        assert_eq!(v["status"], "pending");
        assert_eq!(v["max_retries"], 3);
        assert!(v["worker_id"].is_null());
    }
}
