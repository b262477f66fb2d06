//! In-memory job store for tests and single-process deployments.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::store::{JobFilter, JobPage, JobStore, JobStoreError, QueueStats, TypeStatusCount};
use crate::types::{FailOutcome, Job, JobId, JobSpec, JobStatus, QueueLimits, SweptJob};

/// In-memory `JobStore`.
///
/// All mutating operations run under the single write guard, so a claim's
/// select-and-mark is one indivisible critical section: two concurrent
/// claims can never observe the same pending row.
#[derive(Debug)]
pub struct InMemoryJobStore {
    limits: QueueLimits,
    inner: RwLock<Inner>,
}

#[derive(Debug)]
struct Inner {
    next_id: i64,
    jobs: BTreeMap<JobId, Job>,
}

impl InMemoryJobStore {
    pub fn new(limits: QueueLimits) -> Self {
        Self {
            limits,
            inner: RwLock::new(Inner {
                next_id: 1,
                jobs: BTreeMap::new(),
            }),
        }
    }

    fn insert(inner: &mut Inner, spec: JobSpec) -> Job {
        let id = JobId(inner.next_id);
        inner.next_id += 1;
        let job = Job {
            id,
            job_type: spec.job_type,
            status: JobStatus::Pending,
            params: spec.params,
            result: None,
            error: None,
            priority: spec.priority,
            retries: 0,
            max_retries: spec.max_retries,
            worker_id: None,
            created_at: Utc::now(),
            claimed_at: None,
            started_at: None,
            completed_at: None,
        };
        inner.jobs.insert(id, job.clone());
        job
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new(QueueLimits::default())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, spec: JobSpec) -> Result<Job, JobStoreError> {
        spec.validate(&self.limits)?;
        let mut inner = self.inner.write().unwrap();
        Ok(Self::insert(&mut inner, spec))
    }

    async fn create_batch(&self, specs: Vec<JobSpec>) -> Result<Vec<Job>, JobStoreError> {
        if specs.is_empty() {
            return Err(JobStoreError::EmptyBatch);
        }
        if specs.len() > self.limits.max_batch {
            return Err(JobStoreError::BatchTooLarge(self.limits.max_batch));
        }
        // Validate everything up front: one bad spec rejects the whole batch.
        for spec in &specs {
            spec.validate(&self.limits)?;
        }
        let mut inner = self.inner.write().unwrap();
        Ok(specs
            .into_iter()
            .map(|spec| Self::insert(&mut inner, spec))
            .collect())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.jobs.get(&id).cloned())
    }

    async fn list(&self, filter: JobFilter) -> Result<JobPage, JobStoreError> {
        let inner = self.inner.read().unwrap();
        let limit = filter
            .limit
            .unwrap_or(self.limits.default_list_limit)
            .min(self.limits.max_list_limit);

        let mut matching: Vec<_> = inner
            .jobs
            .values()
            .filter(|j| filter.status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        matching.sort_by_key(|j| (j.created_at, j.id));

        let total = matching.len() as u64;
        let entries: Vec<Job> = matching
            .into_iter()
            .skip(filter.offset as usize)
            .take(limit as usize)
            .collect();

        Ok(JobPage { entries, total })
    }

    async fn claim(
        &self,
        worker_id: &str,
        type_filter: Option<&str>,
    ) -> Result<Option<Job>, JobStoreError> {
        let mut inner = self.inner.write().unwrap();

        // Highest priority first, ties broken oldest first.
        let candidate = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .filter(|j| type_filter.is_none_or(|t| j.job_type == t))
            .min_by_key(|j| (Reverse(j.priority), j.created_at, j.id))
            .map(|j| j.id);

        if let Some(id) = candidate {
            if let Some(job) = inner.jobs.get_mut(&id) {
                job.status = JobStatus::Claimed;
                job.worker_id = Some(worker_id.to_string());
                job.claimed_at = Some(Utc::now());
                return Ok(Some(job.clone()));
            }
        }

        Ok(None)
    }

    async fn start(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let mut inner = self.inner.write().unwrap();
        match inner.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Claimed => {
                job.status = JobStatus::Running;
                job.started_at = Some(Utc::now());
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn complete(
        &self,
        id: JobId,
        result: Option<serde_json::Value>,
    ) -> Result<Option<Job>, JobStoreError> {
        let mut inner = self.inner.write().unwrap();
        match inner.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Completed;
                job.result = result;
                job.completed_at = Some(Utc::now());
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn fail(&self, id: JobId, error: &str) -> Result<Option<FailOutcome>, JobStoreError> {
        let mut inner = self.inner.write().unwrap();
        match inner.jobs.get_mut(&id) {
            Some(job) if matches!(job.status, JobStatus::Running | JobStatus::Claimed) => {
                job.retries += 1;
                job.error = Some(error.to_string());
                let retried = job.retries < job.max_retries;
                if retried {
                    // Requeue: claimable again, claimant identity wiped.
                    job.status = JobStatus::Pending;
                    job.worker_id = None;
                    job.claimed_at = None;
                    job.started_at = None;
                } else {
                    job.status = JobStatus::Failed;
                    job.completed_at = Some(Utc::now());
                }
                Ok(Some(FailOutcome {
                    job: job.clone(),
                    retried,
                }))
            }
            _ => Ok(None),
        }
    }

    async fn cancel(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let mut inner = self.inner.write().unwrap();
        match inner.jobs.get_mut(&id) {
            Some(job) if matches!(job.status, JobStatus::Pending | JobStatus::Claimed) => {
                job.status = JobStatus::Cancelled;
                job.claimed_at = None;
                job.completed_at = Some(Utc::now());
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn sweep(&self, stale_after: Duration) -> Result<Vec<SweptJob>, JobStoreError> {
        // An unrepresentable cutoff means no claim can be old enough.
        let cutoff = chrono::Duration::from_std(stale_after)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d));
        let Some(cutoff) = cutoff else {
            return Ok(Vec::new());
        };
        let mut inner = self.inner.write().unwrap();

        let mut swept = Vec::new();
        for job in inner.jobs.values_mut() {
            let stale = matches!(job.status, JobStatus::Claimed | JobStatus::Running)
                && job.claimed_at.is_some_and(|t| t < cutoff);
            if stale {
                job.status = JobStatus::Pending;
                job.worker_id = None;
                job.claimed_at = None;
                job.started_at = None;
                swept.push(SweptJob {
                    id: job.id,
                    job_type: job.job_type.clone(),
                });
            }
        }

        Ok(swept)
    }

    async fn stats(&self) -> Result<QueueStats, JobStoreError> {
        let inner = self.inner.read().unwrap();
        let mut stats = QueueStats::default();
        let mut by_type: BTreeMap<(String, &'static str), (JobStatus, u64)> = BTreeMap::new();

        for job in inner.jobs.values() {
            stats.record(job.status, 1);
            by_type
                .entry((job.job_type.clone(), job.status.as_str()))
                .or_insert((job.status, 0))
                .1 += 1;
        }

        stats.by_type = by_type
            .into_iter()
            .map(|((job_type, _), (status, count))| TypeStatusCount {
                job_type,
                status,
                count,
            })
            .collect();

        Ok(stats)
    }
}
