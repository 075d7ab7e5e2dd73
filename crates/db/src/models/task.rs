//! Scheduled-task entity model and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use deferq_core::types::{DbId, Timestamp};

use super::status::TaskStatus;

/// A row from the `scheduled_tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Task {
    pub id: DbId,
    pub execute_at: Timestamp,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    /// Execution attempts begun; incremented when a worker claims the task.
    pub attempts: i32,
    pub max_attempts: i32,
    /// Last executor diagnostic, or the response body of the last successful
    /// callback.
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Set on transition to `completed` or `failed`.
    pub completed_at: Option<Timestamp>,
}

/// Validated input for inserting a new task.
#[derive(Debug)]
pub struct CreateTask {
    pub execute_at: Timestamp,
    pub task_type: String,
    pub payload: serde_json::Value,
    /// Retry budget; `None` or 0 falls back to the default of 3.
    pub max_attempts: Option<i32>,
}

/// Query parameters for `GET /api/v1/tasks`.
#[derive(Debug, Default, Deserialize)]
pub struct TaskListQuery {
    /// Filter by lifecycle status.
    pub status: Option<TaskStatus>,
    /// Filter by task type discriminator.
    pub task_type: Option<String>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}
