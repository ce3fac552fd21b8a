//! Job DB Client (C4, §6).
//!
//! Narrow contract the Worker and Node Controller depend on; the trait
//! is the stable interface, `SqliteJobDb` is one concrete backend.
//! Cluster scheduling policy and multi-node locking semantics beyond
//! single-row atomic claims are out of scope here — fairness and
//! priority policy live in the `ORDER BY` clause, nothing more.

mod constants;
mod error;
mod sqlite;

pub use constants::{TYPE_ADMIN, TYPE_NORMAL};
pub use error::JobDbError;
pub use sqlite::SqliteJobDb;

use async_trait::async_trait;
use meridian_protocol::{Job, JobState};

/// A job offered back by `allocate_job`: enough of the row to run it,
/// independent of storage layout.
#[derive(Debug, Clone)]
pub struct AllocatedJob {
    pub job: Job,
}

/// The narrow Job DB contract (§6). Implementors must be safe to share
/// across the worker-acquisition loop and any cancellation-monitor
/// tasks.
#[async_trait]
pub trait JobDbClient: Send + Sync {
    /// Atomically claim up to `max_jobs` queued jobs this worker
    /// supports, preferring `prefer` when present. May return fewer
    /// than `max_jobs`, including zero.
    async fn allocate_job(
        &self,
        worker_id: &str,
        node: &str,
        supported: &[String],
        max_jobs: usize,
        worker_type: &str,
        prefer: Option<&str>,
    ) -> Result<Vec<AllocatedJob>, JobDbError>;

    /// Commit a terminal (or intermediate progress) state for a job.
    async fn update_job(
        &self,
        id: i64,
        state: JobState,
        retval: Option<serde_json::Value>,
        cpu: Option<f64>,
        memory: Option<u64>,
    ) -> Result<(), JobDbError>;

    /// `None` means the job row no longer exists (treated the same as
    /// `CANCELLED` by a cancellation monitor, per §4.4.3 step 4).
    async fn get_job_state(&self, id: i64) -> Result<Option<JobState>, JobDbError>;

    async fn update_worker(
        &self,
        wid: &str,
        supported_json: &str,
        last_job_time: f64,
    ) -> Result<(), JobDbError>;

    async fn remove_worker(&self, wid: &str) -> Result<(), JobDbError>;

    /// Reconciliation hook for a clean shutdown: re-queues or
    /// force-fails whatever this worker still held. Only called on
    /// clean exit (§7) — crash recovery depends entirely on the DB
    /// side noticing a stale claim, not on this call.
    async fn force_stopped(&self, worker_id: &str, node: &str) -> Result<(), JobDbError>;
}
