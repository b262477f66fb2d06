//! Postgres-backed job store.
//!
//! Every mutation is a single SQL statement whose `WHERE` clause carries the
//! expected current status, so a transition either applies in full or matches
//! no row. The claim statement selects its candidate with
//! `FOR UPDATE SKIP LOCKED`: contending claims skip rows another claim is
//! mid-selecting instead of blocking behind them.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::{debug, warn};

use crate::store::{JobFilter, JobPage, JobStore, JobStoreError, QueueStats, TypeStatusCount};
use crate::types::{FailOutcome, Job, JobId, JobSpec, JobStatus, QueueLimits, SweptJob};

/// Postgres `JobStore`.
///
/// Shares a `PgPool`; cloning is cheap and all clones hit the same pool.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
    limits: QueueLimits,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_limits(pool, QueueLimits::default())
    }

    pub fn with_limits(pool: PgPool, limits: QueueLimits) -> Self {
        Self { pool, limits }
    }

    /// Apply `schema.sql` (idempotent DDL).
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        sqlx::raw_sql(include_str!("../schema.sql"))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn insert_one(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        spec: &JobSpec,
    ) -> Result<Job, JobStoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO jobs (type, params, priority, max_retries)
            VALUES ($1, $2, $3, $4)
            RETURNING
                id, type, status, params, result, error, priority, retries,
                max_retries, worker_id, created_at, claimed_at, started_at, completed_at
            "#,
        )
        .bind(&spec.job_type)
        .bind(&spec.params)
        .bind(spec.priority)
        .bind(spec.max_retries as i32)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("create", e))?;

        job_from_row(&row, "create")
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(&self, spec: JobSpec) -> Result<Job, JobStoreError> {
        spec.validate(&self.limits)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("create", e))?;
        let job = Self::insert_one(&mut tx, &spec).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("create", e))?;

        debug!(job_id = %job.id, job_type = %job.job_type, "job created");
        Ok(job)
    }

    async fn create_batch(&self, specs: Vec<JobSpec>) -> Result<Vec<Job>, JobStoreError> {
        if specs.is_empty() {
            return Err(JobStoreError::EmptyBatch);
        }
        if specs.len() > self.limits.max_batch {
            return Err(JobStoreError::BatchTooLarge(self.limits.max_batch));
        }
        for spec in &specs {
            spec.validate(&self.limits)?;
        }

        // One transaction: either the whole batch lands or none of it.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("create_batch", e))?;

        let mut jobs = Vec::with_capacity(specs.len());
        for spec in &specs {
            jobs.push(Self::insert_one(&mut tx, spec).await?);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("create_batch", e))?;

        debug!(count = jobs.len(), "job batch created");
        Ok(jobs)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                id, type, status, params, result, error, priority, retries,
                max_retries, worker_id, created_at, claimed_at, started_at, completed_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|r| job_from_row(&r, "get")).transpose()
    }

    async fn list(&self, filter: JobFilter) -> Result<JobPage, JobStoreError> {
        let status = filter.status.map(|s| s.as_str());
        let limit = filter
            .limit
            .unwrap_or(self.limits.default_list_limit)
            .min(self.limits.max_list_limit);

        let count_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM jobs
            WHERE ($1::text IS NULL OR status = $1)
            "#,
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| JobStoreError::storage("list", e.to_string()))?;

        let rows = sqlx::query(
            r#"
            SELECT
                id, type, status, params, result, error, priority, retries,
                max_retries, worker_id, created_at, claimed_at, started_at, completed_at
            FROM jobs
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at ASC, id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status)
        .bind(limit as i64)
        .bind(filter.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        let entries = rows
            .iter()
            .map(|r| job_from_row(r, "list"))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(JobPage {
            entries,
            total: total as u64,
        })
    }

    async fn claim(
        &self,
        worker_id: &str,
        type_filter: Option<&str>,
    ) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'claimed',
                worker_id = $1,
                claimed_at = NOW()
            WHERE id IN (
                SELECT id FROM jobs
                WHERE status = 'pending' AND ($2::text IS NULL OR type = $2)
                ORDER BY priority DESC, created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING
                id, type, status, params, result, error, priority, retries,
                max_retries, worker_id, created_at, claimed_at, started_at, completed_at
            "#,
        )
        .bind(worker_id)
        .bind(type_filter)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim", e))?;

        let claimed = row.map(|r| job_from_row(&r, "claim")).transpose()?;
        if let Some(job) = &claimed {
            debug!(job_id = %job.id, job_type = %job.job_type, worker = worker_id, "job claimed");
        }
        Ok(claimed)
    }

    async fn start(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'running',
                started_at = NOW()
            WHERE id = $1 AND status = 'claimed'
            RETURNING
                id, type, status, params, result, error, priority, retries,
                max_retries, worker_id, created_at, claimed_at, started_at, completed_at
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("start", e))?;

        row.map(|r| job_from_row(&r, "start")).transpose()
    }

    async fn complete(
        &self,
        id: JobId,
        result: Option<serde_json::Value>,
    ) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'completed',
                result = $2,
                completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING
                id, type, status, params, result, error, priority, retries,
                max_retries, worker_id, created_at, claimed_at, started_at, completed_at
            "#,
        )
        .bind(id.as_i64())
        .bind(result)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("complete", e))?;

        row.map(|r| job_from_row(&r, "complete")).transpose()
    }

    async fn fail(&self, id: JobId, error: &str) -> Result<Option<FailOutcome>, JobStoreError> {
        // Requeue-vs-terminal is decided inside the statement: every SET
        // expression sees the pre-update row, so the CASE branches agree.
        let row = sqlx::query(
            r#"
            UPDATE jobs SET
                retries      = retries + 1,
                error        = $2,
                status       = CASE WHEN retries + 1 >= max_retries
                                    THEN 'failed' ELSE 'pending' END,
                worker_id    = CASE WHEN retries + 1 >= max_retries
                                    THEN worker_id ELSE NULL END,
                claimed_at   = CASE WHEN retries + 1 >= max_retries
                                    THEN claimed_at ELSE NULL END,
                started_at   = CASE WHEN retries + 1 >= max_retries
                                    THEN started_at ELSE NULL END,
                completed_at = CASE WHEN retries + 1 >= max_retries
                                    THEN NOW() ELSE NULL END
            WHERE id = $1 AND status IN ('running', 'claimed')
            RETURNING
                id, type, status, params, result, error, priority, retries,
                max_retries, worker_id, created_at, claimed_at, started_at, completed_at
            "#,
        )
        .bind(id.as_i64())
        .bind(error)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fail", e))?;

        let outcome = row
            .map(|r| {
                let job = job_from_row(&r, "fail")?;
                let retried = job.status == JobStatus::Pending;
                Ok::<_, JobStoreError>(FailOutcome { job, retried })
            })
            .transpose()?;

        if let Some(o) = &outcome {
            if o.retried {
                debug!(job_id = %o.job.id, retries = o.job.retries, "job requeued after failure");
            } else {
                warn!(job_id = %o.job.id, retries = o.job.retries, "job failed terminally");
            }
        }
        Ok(outcome)
    }

    async fn cancel(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'cancelled',
                claimed_at = NULL,
                completed_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'claimed')
            RETURNING
                id, type, status, params, result, error, priority, retries,
                max_retries, worker_id, created_at, claimed_at, started_at, completed_at
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("cancel", e))?;

        row.map(|r| job_from_row(&r, "cancel")).transpose()
    }

    async fn sweep(&self, stale_after: Duration) -> Result<Vec<SweptJob>, JobStoreError> {
        let cutoff = chrono::Duration::from_std(stale_after)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d));
        let Some(cutoff) = cutoff else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'pending',
                worker_id = NULL,
                claimed_at = NULL,
                started_at = NULL
            WHERE status IN ('claimed', 'running') AND claimed_at < $1
            RETURNING id, type
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("sweep", e))?;

        let mut swept = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row
                .try_get("id")
                .map_err(|e| JobStoreError::storage("sweep", e.to_string()))?;
            let job_type: String = row
                .try_get("type")
                .map_err(|e| JobStoreError::storage("sweep", e.to_string()))?;
            warn!(job_id = id, job_type = %job_type, "reclaimed stale job");
            swept.push(SweptJob {
                id: JobId(id),
                job_type,
            });
        }

        Ok(swept)
    }

    async fn stats(&self) -> Result<QueueStats, JobStoreError> {
        let status_rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM jobs
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = QueueStats::default();
        for row in status_rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| JobStoreError::storage("stats", e.to_string()))?;
            let count: i64 = row
                .try_get("count")
                .map_err(|e| JobStoreError::storage("stats", e.to_string()))?;
            let status = parse_status(&status, "stats")?;
            stats.record(status, count as u64);
        }

        let type_rows = sqlx::query(
            r#"
            SELECT type, status, COUNT(*) AS count
            FROM jobs
            GROUP BY type, status
            ORDER BY type ASC, status ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        for row in type_rows {
            let job_type: String = row
                .try_get("type")
                .map_err(|e| JobStoreError::storage("stats", e.to_string()))?;
            let status: String = row
                .try_get("status")
                .map_err(|e| JobStoreError::storage("stats", e.to_string()))?;
            let count: i64 = row
                .try_get("count")
                .map_err(|e| JobStoreError::storage("stats", e.to_string()))?;
            stats.by_type.push(TypeStatusCount {
                job_type,
                status: parse_status(&status, "stats")?,
                count: count as u64,
            });
        }

        Ok(stats)
    }
}

// Row mapping

#[derive(Debug)]
struct JobRow {
    id: i64,
    job_type: String,
    status: String,
    params: Option<serde_json::Value>,
    result: Option<serde_json::Value>,
    error: Option<String>,
    priority: i32,
    retries: i32,
    max_retries: i32,
    worker_id: Option<String>,
    created_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            job_type: row.try_get("type")?,
            status: row.try_get("status")?,
            params: row.try_get("params")?,
            result: row.try_get("result")?,
            error: row.try_get("error")?,
            priority: row.try_get("priority")?,
            retries: row.try_get("retries")?,
            max_retries: row.try_get("max_retries")?,
            worker_id: row.try_get("worker_id")?,
            created_at: row.try_get("created_at")?,
            claimed_at: row.try_get("claimed_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

fn job_from_row(row: &PgRow, operation: &'static str) -> Result<Job, JobStoreError> {
    let row =
        JobRow::from_row(row).map_err(|e| JobStoreError::storage(operation, e.to_string()))?;
    let status = parse_status(&row.status, operation)?;
    Ok(Job {
        id: JobId(row.id),
        job_type: row.job_type,
        status,
        params: row.params,
        result: row.result,
        error: row.error,
        priority: row.priority,
        retries: row.retries.max(0) as u32,
        max_retries: row.max_retries.max(0) as u32,
        worker_id: row.worker_id,
        created_at: row.created_at,
        claimed_at: row.claimed_at,
        started_at: row.started_at,
        completed_at: row.completed_at,
    })
}

fn parse_status(s: &str, operation: &'static str) -> Result<JobStatus, JobStoreError> {
    JobStatus::parse(s)
        .ok_or_else(|| JobStoreError::storage(operation, format!("unknown job status '{s}'")))
}

/// Map sqlx errors to `JobStoreError`, keeping the failing operation name.
fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => JobStoreError::storage(
            operation,
            format!("database error: {}", db_err.message()),
        ),
        sqlx::Error::PoolClosed => JobStoreError::storage(operation, "connection pool closed"),
        other => JobStoreError::storage(operation, other.to_string()),
    }
}
