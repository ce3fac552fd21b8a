//! `SqliteJobDb`: the concrete Job DB Client (§4.8), grounded in
//! `casparian_sentinel::db::queue::JobQueue`'s atomic claim pattern —
//! `UPDATE ... WHERE status = 'QUEUED'` inside a transaction, re-fetch
//! the winning row, `Ok(None)` on a lost race.

use async_trait::async_trait;
use chrono::Utc;
use meridian_protocol::{Job, JobId, JobState};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};

use crate::error::JobDbError;
use crate::{AllocatedJob, JobDbClient};

pub struct SqliteJobDb {
    pool: Pool<Sqlite>,
}

impl SqliteJobDb {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, JobDbError> {
        let pool = SqlitePoolOptions::new().max_connections(8).connect(url).await?;
        Ok(Self::new(pool))
    }

    /// Create the tables this implementation relies on. Production
    /// deployments are expected to migrate this schema out-of-band;
    /// this is here so the crate is runnable end to end (tests,
    /// `--memory` style local runs) without an external migrator.
    pub async fn migrate(&self) -> Result<(), JobDbError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY,
                module TEXT NOT NULL,
                modulepath TEXT,
                workdir TEXT,
                priority INTEGER NOT NULL DEFAULT 0,
                args TEXT NOT NULL DEFAULT '{}',
                post TEXT,
                log_level TEXT,
                status TEXT NOT NULL DEFAULT 'QUEUED',
                claimed_by TEXT,
                claimed_node TEXT,
                retval TEXT,
                cpu REAL,
                memory INTEGER,
                claim_time TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workers (
                wid TEXT PRIMARY KEY,
                supported TEXT NOT NULL DEFAULT '[]',
                last_job_time REAL NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_job(&self, id: i64) -> Result<Job, JobDbError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        row_to_job(&row)
    }
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job, JobDbError> {
    let id: i64 = row.try_get("id")?;
    let module: String = row.try_get("module")?;
    let modulepath: Option<String> = row.try_get("modulepath")?;
    let workdir: Option<String> = row.try_get("workdir")?;
    let priority: i64 = row.try_get("priority")?;
    let args_raw: String = row.try_get("args")?;
    let post_raw: Option<String> = row.try_get("post")?;
    let log_level: Option<String> = row.try_get("log_level")?;

    let args = serde_json::from_str(&args_raw)
        .map_err(|e| JobDbError::Decode(format!("job {id} args: {e}")))?;
    let post = post_raw
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|e| JobDbError::Decode(format!("job {id} post: {e}")))
        })
        .transpose()?;

    Ok(Job {
        id: JobId::new(id),
        module,
        modulepath: modulepath.map(Into::into),
        workdir: workdir.map(Into::into),
        priority,
        args,
        post,
        log_level,
    })
}

fn state_to_sql(state: JobState) -> &'static str {
    match state {
        JobState::Queued => "QUEUED",
        JobState::Allocated => "ALLOCATED",
        JobState::Completed => "COMPLETED",
        JobState::Failed => "FAILED",
        JobState::Cancelled => "CANCELLED",
    }
}

#[async_trait]
impl JobDbClient for SqliteJobDb {
    async fn allocate_job(
        &self,
        worker_id: &str,
        node: &str,
        supported: &[String],
        max_jobs: usize,
        _worker_type: &str,
        prefer: Option<&str>,
    ) -> Result<Vec<AllocatedJob>, JobDbError> {
        let mut allocated = Vec::with_capacity(max_jobs);

        for _ in 0..max_jobs {
            let mut tx = self.pool.begin().await?;

            let candidate_id: Option<i64> = if supported.iter().any(|m| m == "any") {
                sqlx::query_scalar(
                    "SELECT id FROM jobs WHERE status = 'QUEUED'
                     ORDER BY CASE WHEN module = ? THEN 0 ELSE 1 END, priority DESC, id ASC
                     LIMIT 1",
                )
                .bind(prefer.unwrap_or(""))
                .fetch_optional(&mut *tx)
                .await?
            } else {
                let placeholders = supported.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                let sql = format!(
                    "SELECT id FROM jobs WHERE status = 'QUEUED' AND module IN ({placeholders})
                     ORDER BY CASE WHEN module = ? THEN 0 ELSE 1 END, priority DESC, id ASC
                     LIMIT 1"
                );
                let mut q = sqlx::query_scalar(&sql);
                for m in supported {
                    q = q.bind(m);
                }
                q = q.bind(prefer.unwrap_or(""));
                q.fetch_optional(&mut *tx).await?
            };

            let Some(candidate_id) = candidate_id else {
                tx.commit().await?;
                break;
            };

            let now = Utc::now().to_rfc3339();
            let rows_affected = sqlx::query(
                "UPDATE jobs SET status = 'ALLOCATED', claimed_by = ?, claimed_node = ?, claim_time = ?
                 WHERE id = ? AND status = 'QUEUED'",
            )
            .bind(worker_id)
            .bind(node)
            .bind(&now)
            .bind(candidate_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if rows_affected == 0 {
                tx.commit().await?;
                continue;
            }

            let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
                .bind(candidate_id)
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;

            let job = row_to_job(&row)?;
            allocated.push(AllocatedJob { job });
        }

        Ok(allocated)
    }

    async fn update_job(
        &self,
        id: i64,
        state: JobState,
        retval: Option<serde_json::Value>,
        cpu: Option<f64>,
        memory: Option<u64>,
    ) -> Result<(), JobDbError> {
        let retval_json = retval.map(|v| v.to_string());
        sqlx::query(
            "UPDATE jobs SET status = ?, retval = ?, cpu = ?, memory = ? WHERE id = ?",
        )
        .bind(state_to_sql(state))
        .bind(retval_json)
        .bind(cpu)
        .bind(memory.map(|m| m as i64))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job_state(&self, id: i64) -> Result<Option<JobState>, JobDbError> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(status) = status else {
            return Ok(None);
        };

        let state = match status.as_str() {
            "QUEUED" => JobState::Queued,
            "ALLOCATED" => JobState::Allocated,
            "COMPLETED" => JobState::Completed,
            "FAILED" => JobState::Failed,
            "CANCELLED" => JobState::Cancelled,
            other => return Err(JobDbError::Decode(format!("unknown job status: {other}"))),
        };
        Ok(Some(state))
    }

    async fn update_worker(
        &self,
        wid: &str,
        supported_json: &str,
        last_job_time: f64,
    ) -> Result<(), JobDbError> {
        sqlx::query(
            "INSERT INTO workers (wid, supported, last_job_time) VALUES (?, ?, ?)
             ON CONFLICT(wid) DO UPDATE SET supported = excluded.supported, last_job_time = excluded.last_job_time",
        )
        .bind(wid)
        .bind(supported_json)
        .bind(last_job_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_worker(&self, wid: &str) -> Result<(), JobDbError> {
        sqlx::query("DELETE FROM workers WHERE wid = ?")
            .bind(wid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn force_stopped(&self, worker_id: &str, node: &str) -> Result<(), JobDbError> {
        sqlx::query(
            "UPDATE jobs SET status = 'QUEUED', claimed_by = NULL, claimed_node = NULL, claim_time = NULL
             WHERE claimed_by = ? AND claimed_node = ? AND status = 'ALLOCATED'",
        )
        .bind(worker_id)
        .bind(node)
        .execute(&self.pool)
        .await?;
        self.remove_worker(worker_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> SqliteJobDb {
        let db = SqliteJobDb::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    async fn insert_job(db: &SqliteJobDb, module: &str, priority: i64) -> i64 {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO jobs (module, args, priority) VALUES (?, '{}', ?) RETURNING id",
        )
        .bind(module)
        .bind(priority)
        .fetch_one(&db.pool)
        .await
        .unwrap();
        row.0
    }

    #[tokio::test]
    async fn allocate_empty_queue_returns_empty() {
        let db = setup().await;
        let jobs = db
            .allocate_job("w1", "host", &["echo".to_string()], 1, "normal", None)
            .await
            .unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn allocate_claims_highest_priority_first() {
        let db = setup().await;
        insert_job(&db, "echo", 0).await;
        let high_id = insert_job(&db, "echo", 10).await;

        let jobs = db
            .allocate_job("w1", "host", &["echo".to_string()], 1, "normal", None)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job.id.as_i64(), high_id);
    }

    #[tokio::test]
    async fn allocate_does_not_double_claim() {
        let db = setup().await;
        insert_job(&db, "echo", 0).await;

        let first = db
            .allocate_job("w1", "host", &["echo".to_string()], 1, "normal", None)
            .await
            .unwrap();
        let second = db
            .allocate_job("w2", "host", &["echo".to_string()], 1, "normal", None)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn update_job_then_get_job_state_reflects_terminal_state() {
        let db = setup().await;
        let id = insert_job(&db, "echo", 0).await;

        db.update_job(id, JobState::Completed, Some(serde_json::json!({"x": 1})), Some(0.5), Some(1024))
            .await
            .unwrap();

        let state = db.get_job_state(id).await.unwrap();
        assert_eq!(state, Some(JobState::Completed));
    }

    #[tokio::test]
    async fn get_job_state_returns_none_for_missing_job() {
        let db = setup().await;
        let state = db.get_job_state(9999).await.unwrap();
        assert_eq!(state, None);
    }

    #[tokio::test]
    async fn force_stopped_requeues_allocated_jobs_for_that_worker() {
        let db = setup().await;
        insert_job(&db, "echo", 0).await;
        let jobs = db
            .allocate_job("w1", "host", &["echo".to_string()], 1, "normal", None)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);

        db.force_stopped("w1", "host").await.unwrap();

        let row: (String,) = sqlx::query_as("SELECT status FROM jobs WHERE id = ?")
            .bind(jobs[0].job.id.as_i64())
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(row.0, "QUEUED");
    }
}
