//! Persistent background job queue with exactly-once-claim semantics.
//!
//! ## Design
//!
//! - Jobs are priority-ordered, typed, and carry opaque payloads
//! - A pool of independent workers pulls work via atomic claims
//! - Failed jobs retry up to a per-job ceiling, then fail terminally
//! - Jobs abandoned by crashed workers are reclaimed by the stale sweep
//!
//! ## Components
//!
//! - `Job`/`JobSpec`: the job record and its creation spec
//! - `JobStore`: persistence (in-memory or Postgres)
//! - `JobRunner`: pull-based worker loop with per-type handlers
//! - `Sweeper`: interval-driven lost-worker recovery

pub mod memory;
pub mod postgres;
pub mod runner;
pub mod store;
pub mod sweeper;
pub mod types;

pub use memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;
pub use runner::{JobHandler, JobRunner, JobRunnerConfig, JobRunnerHandle};
pub use store::{JobFilter, JobPage, JobStore, JobStoreError, QueueStats, TypeStatusCount};
pub use sweeper::{Sweeper, SweeperConfig, SweeperHandle};
pub use types::{
    DEFAULT_MAX_RETRIES, FailOutcome, Job, JobId, JobSpec, JobStatus, QueueLimits, SpecError,
    SweptJob,
};
