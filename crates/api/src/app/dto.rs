//! Request DTOs and JSON mapping helpers.
//!
//! Request bodies use the wire names producers/workers send (`workerId`,
//! `maxRetries`); job responses serialize with the record's own snake_case
//! field names.

use serde::Deserialize;

use wikiforge_queue::{DEFAULT_MAX_RETRIES, FailOutcome, JobSpec};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    #[serde(rename = "type")]
    pub job_type: String,
    pub params: Option<serde_json::Value>,
    pub priority: Option<i32>,
    pub max_retries: Option<u32>,
}

impl CreateJobRequest {
    pub fn into_spec(self) -> JobSpec {
        JobSpec {
            job_type: self.job_type,
            params: self.params,
            priority: self.priority.unwrap_or(0),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub worker_id: Option<String>,
    #[serde(rename = "type")]
    pub job_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u64>,
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn fail_outcome_to_json(outcome: &FailOutcome) -> serde_json::Value {
    serde_json::json!({
        "job": outcome.job,
        "retried": outcome.retried,
    })
}
