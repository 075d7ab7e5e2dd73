//! Repository for the `scheduled_tasks` table.
//!
//! The table is the queue: workers lease due rows with
//! `FOR UPDATE SKIP LOCKED`, settle them by id, and the sweeper recovers
//! rows whose lease went stale. All status literals go through
//! [`TaskStatus`].

use sqlx::PgPool;

use deferq_core::types::DbId;
use deferq_core::validation::DEFAULT_MAX_ATTEMPTS;

use crate::models::status::TaskStatus;
use crate::models::task::{CreateTask, Task, TaskListQuery};

/// Column list for `scheduled_tasks` queries.
const COLUMNS: &str = "\
    id, execute_at, task_type, payload, status, attempts, max_attempts, \
    error_message, created_at, updated_at, completed_at";

/// Maximum page size for task listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for task listing.
const DEFAULT_LIMIT: i64 = 50;

/// Diagnostic recorded when a task exhausts its retry budget while stuck.
pub const MAX_ATTEMPTS_MESSAGE: &str = "Max attempts reached";

/// Provides queue and CRUD operations for scheduled tasks.
pub struct TaskRepo;

impl TaskRepo {
    /// Insert a new task in `pending` status.
    ///
    /// `max_attempts` of `None` or 0 falls back to the default budget of 3.
    pub async fn create(pool: &PgPool, input: &CreateTask) -> Result<Task, sqlx::Error> {
        let max_attempts = input
            .max_attempts
            .filter(|&m| m > 0)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);

        let query = format!(
            "INSERT INTO scheduled_tasks (execute_at, task_type, payload, max_attempts) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(input.execute_at)
            .bind(&input.task_type)
            .bind(&input.payload)
            .bind(max_attempts)
            .fetch_one(pool)
            .await
    }

    /// Find a task by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Task>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM scheduled_tasks WHERE id = $1");
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Cancel a task if it is still `pending` or `processing`.
    ///
    /// Returns the updated row, or `None` when the task does not exist or is
    /// already terminal (the two cases are not distinguished).
    pub async fn cancel(pool: &PgPool, id: DbId) -> Result<Option<Task>, sqlx::Error> {
        let query = format!(
            "UPDATE scheduled_tasks \
             SET status = $2 \
             WHERE id = $1 AND status IN ($3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .bind(TaskStatus::Cancelled)
            .bind(TaskStatus::Pending)
            .bind(TaskStatus::Processing)
            .fetch_optional(pool)
            .await
    }

    /// List tasks with optional status / task-type filters, newest first,
    /// plus the total count matching the filters.
    pub async fn list(
        pool: &PgPool,
        params: &TaskListQuery,
    ) -> Result<(Vec<Task>, i64), sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let offset = params.offset.unwrap_or(0);

        // Build the WHERE clause and track the next bind parameter index.
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        if params.status.is_some() {
            conditions.push(format!("status = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.task_type.is_some() {
            conditions.push(format!("task_type = ${bind_idx}"));
            bind_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_query = format!("SELECT COUNT(*) FROM scheduled_tasks {where_clause}");
        let mut count = sqlx::query_scalar::<_, i64>(&count_query);
        if let Some(status) = params.status {
            count = count.bind(status);
        }
        if let Some(task_type) = &params.task_type {
            count = count.bind(task_type);
        }
        let total = count.fetch_one(pool).await?;

        let page_query = format!(
            "SELECT {COLUMNS} FROM scheduled_tasks \
             {where_clause} \
             ORDER BY created_at DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1,
        );
        let mut page = sqlx::query_as::<_, Task>(&page_query);
        if let Some(status) = params.status {
            page = page.bind(status);
        }
        if let Some(task_type) = &params.task_type {
            page = page.bind(task_type);
        }
        let tasks = page.bind(limit).bind(offset).fetch_all(pool).await?;

        Ok((tasks, total))
    }

    /// Atomically lease up to `batch_size` due tasks for a worker.
    ///
    /// Selects `pending` rows whose firing time has passed, oldest first,
    /// skipping rows locked by concurrent leasers, and in the same statement
    /// stamps them `processing` and consumes one attempt. After this commits
    /// the rows belong to the calling worker until settled or swept.
    pub async fn lease_due_batch(
        pool: &PgPool,
        batch_size: i64,
    ) -> Result<Vec<Task>, sqlx::Error> {
        let query = format!(
            "WITH due AS ( \
                 SELECT id AS due_id FROM scheduled_tasks \
                 WHERE status = $2 AND execute_at <= NOW() \
                 ORDER BY execute_at ASC \
                 LIMIT $1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE scheduled_tasks \
             SET status = $3, attempts = attempts + 1 \
             FROM due \
             WHERE id = due_id \
             RETURNING {COLUMNS}"
        );
        let mut tasks = sqlx::query_as::<_, Task>(&query)
            .bind(batch_size)
            .bind(TaskStatus::Pending)
            .bind(TaskStatus::Processing)
            .fetch_all(pool)
            .await?;

        // UPDATE ... RETURNING does not preserve the subquery order.
        tasks.sort_by_key(|t| t.execute_at);
        Ok(tasks)
    }

    /// Settle a leased task as `completed`.
    ///
    /// `message` is the executor output (for HTTP callbacks, the response
    /// body). Guarded on `processing` so a concurrent cancel is not
    /// overwritten; returns `false` when the guard did not match.
    pub async fn complete(pool: &PgPool, id: DbId, message: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE scheduled_tasks \
             SET status = $2, completed_at = NOW(), error_message = $3 \
             WHERE id = $1 AND status = $4",
        )
        .bind(id)
        .bind(TaskStatus::Completed)
        .bind(message)
        .bind(TaskStatus::Processing)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Return a failed task to `pending` for another attempt.
    ///
    /// The firing time is left untouched, so the task is immediately
    /// eligible for re-lease.
    pub async fn retry(pool: &PgPool, id: DbId, error: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE scheduled_tasks \
             SET status = $2, error_message = $3 \
             WHERE id = $1 AND status = $4",
        )
        .bind(id)
        .bind(TaskStatus::Pending)
        .bind(error)
        .bind(TaskStatus::Processing)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Settle a leased task as terminally `failed`.
    pub async fn fail(pool: &PgPool, id: DbId, error: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE scheduled_tasks \
             SET status = $2, error_message = $3, completed_at = NOW() \
             WHERE id = $1 AND status = $4",
        )
        .bind(id)
        .bind(TaskStatus::Failed)
        .bind(error)
        .bind(TaskStatus::Processing)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Read fresh `(attempts, max_attempts)` for settlement decisions.
    ///
    /// Re-read from the store rather than taken from the leased row so a
    /// concurrent sweep is accounted for.
    pub async fn attempt_counts(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<(i32, i32)>, sqlx::Error> {
        sqlx::query_as::<_, (i32, i32)>(
            "SELECT attempts, max_attempts FROM scheduled_tasks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Sweep phase one: return stuck tasks with budget remaining to `pending`.
    ///
    /// A task is stuck when it sits in `processing` with no update for longer
    /// than `stuck_timeout`. Attempts are NOT re-incremented here; the
    /// attempt that crashed already consumed its slot at claim time.
    pub async fn restore_stuck(
        pool: &PgPool,
        stuck_timeout: std::time::Duration,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "UPDATE scheduled_tasks \
             SET status = $2 \
             WHERE id IN ( \
                 SELECT id FROM scheduled_tasks \
                 WHERE status = $3 \
                   AND updated_at < NOW() - make_interval(secs => $1) \
                   AND attempts < max_attempts \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id",
        )
        .bind(stuck_timeout.as_secs_f64())
        .bind(TaskStatus::Pending)
        .bind(TaskStatus::Processing)
        .fetch_all(pool)
        .await
    }

    /// Sweep phase two: terminate stuck tasks whose budget is exhausted.
    pub async fn fail_exhausted(
        pool: &PgPool,
        stuck_timeout: std::time::Duration,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "UPDATE scheduled_tasks \
             SET status = $2, error_message = $3, completed_at = NOW() \
             WHERE id IN ( \
                 SELECT id FROM scheduled_tasks \
                 WHERE status = $4 \
                   AND updated_at < NOW() - make_interval(secs => $1) \
                   AND attempts >= max_attempts \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id",
        )
        .bind(stuck_timeout.as_secs_f64())
        .bind(TaskStatus::Failed)
        .bind(MAX_ATTEMPTS_MESSAGE)
        .bind(TaskStatus::Processing)
        .fetch_all(pool)
        .await
    }
}
