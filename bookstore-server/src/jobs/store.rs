//! Durable job queue on the `jobs` table
//!
//! Claiming is a single `UPDATE ... RETURNING`, so two workers can never
//! take the same job. Dedup keys are enforced by a partial unique index over
//! pending and running rows.

use super::{
    DedupScope, Job, JobError, JobResult, JobStatus, NewTask, Queue, backoff_delay,
};
use crate::db::repository::RepoError;
use shared::util::{new_id, now_millis};
use sqlx::{SqliteConnection, SqlitePool};

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    task_type: String,
    payload: String,
    queue: String,
    status: String,
    retried: i64,
    max_retry: i64,
    timeout_secs: i64,
    not_before: i64,
    dedup_key: Option<String>,
    last_error: Option<String>,
    created_at: i64,
    updated_at: i64,
    completed_at: Option<i64>,
}

impl JobRow {
    fn into_model(self) -> JobResult<Job> {
        let queue = Queue::parse(&self.queue)
            .ok_or_else(|| JobError::Corrupt(format!("unknown queue {:?}", self.queue)))?;
        let status = JobStatus::from_db(&self.status)
            .ok_or_else(|| JobError::Corrupt(format!("unknown status {:?}", self.status)))?;
        let payload = serde_json::from_str(&self.payload).map_err(JobError::Payload)?;
        Ok(Job {
            id: self.id,
            task_type: self.task_type,
            payload,
            queue,
            status,
            retried: self.retried,
            max_retry: self.max_retry,
            timeout_secs: self.timeout_secs,
            not_before: self.not_before,
            dedup_key: self.dedup_key,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

const COLUMNS: &str = "id, task_type, payload, queue, status, retried, max_retry, timeout_secs, \
                       not_before, dedup_key, last_error, created_at, updated_at, completed_at";

/// What happened to a failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back to pending, eligible again at `not_before`
    Retrying { not_before: i64 },
    Dead,
}

#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Enqueue a task. Returns `None` when the dedup key is already taken.
    pub async fn enqueue(&self, task: &NewTask) -> JobResult<Option<String>> {
        let mut conn = self.pool.acquire().await.map_err(RepoError::from)?;
        Self::enqueue_in(&mut conn, task).await
    }

    /// Enqueue inside the caller's transaction, so the task only exists if
    /// the change that requires it commits.
    pub async fn enqueue_in(conn: &mut SqliteConnection, task: &NewTask) -> JobResult<Option<String>> {
        let now = now_millis();
        let id = new_id();
        let opts = &task.options;

        // history check and insert are one statement
        let rows = sqlx::query(
            "INSERT INTO jobs (id, task_type, payload, queue, status, retried, max_retry, timeout_secs,
                               not_before, dedup_key, created_at, updated_at)
             SELECT ?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?7, ?8, ?9, ?9
             WHERE NOT (?10 AND EXISTS (SELECT 1 FROM jobs WHERE dedup_key = ?8))
             ON CONFLICT DO NOTHING",
        )
        .bind(&id)
        .bind(&task.task_type)
        .bind(task.payload.to_string())
        .bind(opts.queue.as_str())
        .bind(opts.max_retry)
        .bind(opts.timeout.as_secs() as i64)
        .bind(opts.not_before.unwrap_or(now))
        .bind(&opts.dedup_key)
        .bind(now)
        .bind(opts.dedup_scope == DedupScope::Always)
        .execute(conn)
        .await
        .map_err(RepoError::from)?
        .rows_affected();

        if rows == 0 {
            tracing::debug!(task_type = %task.task_type, dedup_key = ?opts.dedup_key, "Duplicate task skipped");
            return Ok(None);
        }
        tracing::debug!(job_id = %id, task_type = %task.task_type, queue = %opts.queue, "Task enqueued");
        Ok(Some(id))
    }

    /// Claim the next due job of a queue for `worker_id`
    pub async fn claim_next(&self, queue: Queue, worker_id: &str, now: i64) -> JobResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE jobs SET status = 'running', locked_by = ?1, locked_at = ?2, updated_at = ?2
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE queue = ?3 AND status = 'pending' AND not_before <= ?2
                 ORDER BY not_before, created_at
                 LIMIT 1
             ) AND status = 'pending'
             RETURNING {COLUMNS}"
        ))
        .bind(worker_id)
        .bind(now)
        .bind(queue.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(RepoError::from)?;
        row.map(JobRow::into_model).transpose()
    }

    pub async fn complete(&self, id: &str) -> JobResult<()> {
        let now = now_millis();
        sqlx::query(
            "UPDATE jobs SET status = 'completed', completed_at = ?1, updated_at = ?1,
                             locked_by = NULL, last_error = NULL
             WHERE id = ?2 AND status = 'running'",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(RepoError::from)?;
        Ok(())
    }

    /// Record a failed attempt. Retryable failures go back to pending with
    /// exponential backoff until `max_retry` is used up; the rest go dead.
    pub async fn fail(&self, job: &Job, error: &str, retryable: bool) -> JobResult<FailOutcome> {
        let now = now_millis();
        if retryable && !job.is_last_attempt() {
            let retried = job.retried + 1;
            let not_before = now + backoff_delay(retried).as_millis() as i64;
            sqlx::query(
                "UPDATE jobs SET status = 'pending', retried = ?1, not_before = ?2, last_error = ?3,
                                 locked_by = NULL, locked_at = NULL, updated_at = ?4
                 WHERE id = ?5 AND status = 'running'",
            )
            .bind(retried)
            .bind(not_before)
            .bind(error)
            .bind(now)
            .bind(&job.id)
            .execute(&self.pool)
            .await
            .map_err(RepoError::from)?;
            return Ok(FailOutcome::Retrying { not_before });
        }

        sqlx::query(
            "UPDATE jobs SET status = 'dead', last_error = ?1, locked_by = NULL, locked_at = NULL,
                             updated_at = ?2
             WHERE id = ?3 AND status = 'running'",
        )
        .bind(error)
        .bind(now)
        .bind(&job.id)
        .execute(&self.pool)
        .await
        .map_err(RepoError::from)?;
        Ok(FailOutcome::Dead)
    }

    /// Cancel the pending job holding `key`. Joins the caller's transaction.
    pub async fn cancel_by_key(conn: &mut SqliteConnection, key: &str, now: i64) -> JobResult<bool> {
        let rows = sqlx::query(
            "UPDATE jobs SET status = 'cancelled', updated_at = ? WHERE dedup_key = ? AND status = 'pending'",
        )
        .bind(now)
        .bind(key)
        .execute(conn)
        .await
        .map_err(RepoError::from)?
        .rows_affected();
        Ok(rows > 0)
    }

    /// Return running jobs whose lease (`timeout + grace`) ran out to
    /// pending, counting the lost run as an attempt.
    pub async fn recover_stale(&self, now: i64, grace_ms: i64) -> JobResult<u64> {
        let dead = sqlx::query(
            "UPDATE jobs SET status = 'dead', last_error = 'lease expired', locked_by = NULL,
                             locked_at = NULL, updated_at = ?1
             WHERE status = 'running' AND locked_at + timeout_secs * 1000 + ?2 < ?1
               AND retried >= max_retry",
        )
        .bind(now)
        .bind(grace_ms)
        .execute(&self.pool)
        .await
        .map_err(RepoError::from)?
        .rows_affected();

        let requeued = sqlx::query(
            "UPDATE jobs SET status = 'pending', retried = retried + 1, not_before = ?1,
                             last_error = 'lease expired', locked_by = NULL, locked_at = NULL, updated_at = ?1
             WHERE status = 'running' AND locked_at + timeout_secs * 1000 + ?2 < ?1",
        )
        .bind(now)
        .bind(grace_ms)
        .execute(&self.pool)
        .await
        .map_err(RepoError::from)?
        .rows_affected();

        if dead + requeued > 0 {
            tracing::warn!(requeued, dead, "Recovered stale running jobs");
        }
        Ok(requeued + dead)
    }

    pub async fn find(&self, id: &str) -> JobResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!("SELECT {COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepoError::from)?;
        row.map(JobRow::into_model).transpose()
    }

    /// Most recent job with this dedup key, in any state
    pub async fn find_by_key(&self, key: &str) -> JobResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {COLUMNS} FROM jobs WHERE dedup_key = ? ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepoError::from)?;
        row.map(JobRow::into_model).transpose()
    }

    /// Jobs of a type in a state, oldest first (inspection and tests)
    pub async fn list(&self, task_type: &str, status: JobStatus) -> JobResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {COLUMNS} FROM jobs WHERE task_type = ? AND status = ? ORDER BY created_at, id"
        ))
        .bind(task_type)
        .bind(status.as_db())
        .fetch_all(&self.pool)
        .await
        .map_err(RepoError::from)?;
        rows.into_iter().map(JobRow::into_model).collect()
    }

    /// Dead-lettered jobs, newest first
    pub async fn dead_letters(&self, limit: i64) -> JobResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {COLUMNS} FROM jobs WHERE status = 'dead' ORDER BY updated_at DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(RepoError::from)?;
        rows.into_iter().map(JobRow::into_model).collect()
    }

    /// Put a dead job back in its queue with a fresh retry budget
    pub async fn requeue(&self, id: &str) -> JobResult<()> {
        let now = now_millis();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', retried = 0, not_before = ?1, updated_at = ?1
             WHERE id = ?2 AND status = 'dead'",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) if r.rows_affected() == 1 => {
                tracing::info!(job_id = id, "Dead job requeued");
                Ok(())
            }
            Ok(_) => match self.find(id).await? {
                Some(_) => Err(JobError::NotDead(id.to_string())),
                None => Err(JobError::NotFound(id.to_string())),
            },
            // another live job already holds the dedup key
            Err(e) => Err(RepoError::from(e).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{EnqueueOptions, task_types};
    use crate::test_support::memory_db;
    use serde_json::json;

    fn task(key: Option<&str>) -> NewTask {
        let mut opts = EnqueueOptions::default().queue(Queue::High).max_retry(2);
        if let Some(key) = key {
            opts = opts.dedup_key(key);
        }
        NewTask::new(task_types::SEND_ORDER_CONFIRMATION, &json!({"order_id": "o1"}), opts).unwrap()
    }

    #[tokio::test]
    async fn dedup_key_allows_one_live_job() {
        let db = memory_db().await;
        let store = JobStore::new(db.pool.clone());

        let first = store.enqueue(&task(Some("o1"))).await.unwrap();
        assert!(first.is_some());
        assert!(store.enqueue(&task(Some("o1"))).await.unwrap().is_none());

        let job = store.claim_next(Queue::High, "w", now_millis()).await.unwrap().unwrap();
        store.complete(&job.id).await.unwrap();
        // completed jobs no longer hold the key
        assert!(store.enqueue(&task(Some("o1"))).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn always_scope_never_reuses_a_key() {
        let db = memory_db().await;
        let store = JobStore::new(db.pool.clone());
        let mut t = task(Some("cron:x:1"));
        t.options.dedup_scope = DedupScope::Always;

        assert!(store.enqueue(&t).await.unwrap().is_some());
        let job = store.claim_next(Queue::High, "w", now_millis()).await.unwrap().unwrap();
        store.complete(&job.id).await.unwrap();
        assert!(store.enqueue(&t).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn always_scope_counts_finished_jobs_inside_a_transaction() {
        let db = memory_db().await;
        let mut t = task(Some("cron:y:1"));
        t.options.dedup_scope = DedupScope::Always;

        let mut conn = db.pool.acquire().await.unwrap();
        let id = JobStore::enqueue_in(&mut conn, &t).await.unwrap().unwrap();
        sqlx::query("UPDATE jobs SET status = 'dead' WHERE id = ?")
            .bind(&id)
            .execute(&mut *conn)
            .await
            .unwrap();
        assert!(JobStore::enqueue_in(&mut conn, &t).await.unwrap().is_none());

        // active scope ignores history
        t.options.dedup_scope = DedupScope::Active;
        assert!(JobStore::enqueue_in(&mut conn, &t).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delayed_jobs_wait_for_not_before() {
        let db = memory_db().await;
        let store = JobStore::new(db.pool.clone());
        let now = now_millis();
        let mut t = task(None);
        t.options.not_before = Some(now + 60_000);
        store.enqueue(&t).await.unwrap();

        assert!(store.claim_next(Queue::High, "w", now).await.unwrap().is_none());
        assert!(store.claim_next(Queue::High, "w", now + 60_000).await.unwrap().is_some());
        // claimed jobs are not handed out twice
        assert!(store.claim_next(Queue::High, "w", now + 60_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failures_back_off_then_dead_letter() {
        let db = memory_db().await;
        let store = JobStore::new(db.pool.clone());
        store.enqueue(&task(None)).await.unwrap();

        let mut far_future = now_millis();
        for retry in 1..=2 {
            let job = store.claim_next(Queue::High, "w", far_future).await.unwrap().unwrap();
            let outcome = store.fail(&job, "smtp timeout", true).await.unwrap();
            let FailOutcome::Retrying { not_before } = outcome else {
                panic!("expected retry, got {outcome:?}");
            };
            assert!(not_before >= now_millis() + backoff_delay(retry).as_millis() as i64 - 1_000);
            far_future = not_before;
        }

        let job = store.claim_next(Queue::High, "w", far_future).await.unwrap().unwrap();
        assert_eq!(job.retried, 2);
        assert_eq!(store.fail(&job, "smtp timeout", true).await.unwrap(), FailOutcome::Dead);

        let dead = store.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].last_error.as_deref(), Some("smtp timeout"));

        store.requeue(&job.id).await.unwrap();
        let job = store.find(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retried, 0);
    }

    #[tokio::test]
    async fn permanent_failure_goes_dead_immediately() {
        let db = memory_db().await;
        let store = JobStore::new(db.pool.clone());
        store.enqueue(&task(None)).await.unwrap();
        let job = store.claim_next(Queue::High, "w", now_millis()).await.unwrap().unwrap();
        assert_eq!(store.fail(&job, "bad payload", false).await.unwrap(), FailOutcome::Dead);
        assert!(matches!(store.requeue("missing").await, Err(JobError::NotFound(_))));
    }

    #[tokio::test]
    async fn cancel_by_key_only_touches_pending() {
        let db = memory_db().await;
        let store = JobStore::new(db.pool.clone());
        let id = store.enqueue(&task(Some("o1"))).await.unwrap().unwrap();

        let mut conn = db.pool.acquire().await.unwrap();
        assert!(JobStore::cancel_by_key(&mut conn, "o1", now_millis()).await.unwrap());
        assert!(!JobStore::cancel_by_key(&mut conn, "o1", now_millis()).await.unwrap());
        drop(conn);

        let job = store.find(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn stale_running_jobs_are_recovered() {
        let db = memory_db().await;
        let store = JobStore::new(db.pool.clone());
        let id = store.enqueue(&task(None)).await.unwrap().unwrap();
        let now = now_millis();
        store.claim_next(Queue::High, "crashed", now).await.unwrap().unwrap();

        // still inside the lease
        assert_eq!(store.recover_stale(now + 1_000, 5_000).await.unwrap(), 0);

        let later = now + 30_000 + 5_001;
        assert_eq!(store.recover_stale(later, 5_000).await.unwrap(), 1);
        let job = store.find(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retried, 1);
    }
}
