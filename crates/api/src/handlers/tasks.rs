//! Handlers for the `/tasks` resource.
//!
//! Admission only: create, fetch, list, cancel. Workers pick pending tasks
//! up from the store; nothing here pushes work to them.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use deferq_core::error::CoreError;
use deferq_core::types::{DbId, Timestamp};
use deferq_core::validation::{validate_execute_at, validate_task_type};
use deferq_db::models::task::{CreateTask, TaskListQuery};
use deferq_db::repositories::TaskRepo;

use crate::error::{AppError, AppResult};
use crate::response::{TaskListResponse, TaskResponse};
use crate::state::AppState;

/// Request body for `POST /api/v1/tasks`.
///
/// Every field is optional at the serde level so that missing fields
/// produce field-specific validation errors instead of a generic
/// deserialization failure.
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub execute_at: Option<Timestamp>,
    pub task_type: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub max_attempts: Option<i32>,
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks
///
/// Schedule a new task. Returns 201 with the created task, which starts in
/// `pending` status and fires at `execute_at`. Rejects firing times that
/// are not strictly in the future.
pub async fn create_task(
    State(state): State<AppState>,
    Json(input): Json<CreateTaskRequest>,
) -> AppResult<impl IntoResponse> {
    let Some(execute_at) = input.execute_at else {
        return Err(CoreError::Validation("execute_at is required".to_string()).into());
    };
    let task_type = input.task_type.unwrap_or_default();
    validate_task_type(&task_type)?;
    let Some(payload) = input.payload else {
        return Err(CoreError::Validation("payload is required".to_string()).into());
    };
    validate_execute_at(execute_at, Utc::now())?;

    let task = TaskRepo::create(
        &state.pool,
        &CreateTask {
            execute_at,
            task_type,
            payload,
            max_attempts: input.max_attempts,
        },
    )
    .await?;

    tracing::info!(
        task_id = task.id,
        task_type = %task.task_type,
        execute_at = %task.execute_at,
        "Task scheduled",
    );

    Ok((StatusCode::CREATED, Json(TaskResponse { task })))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks/{id}
///
/// Fetch a single task by ID.
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let task = TaskRepo::find_by_id(&state.pool, task_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Task",
            id: task_id,
        }))?;

    Ok(Json(TaskResponse { task }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// DELETE /api/v1/tasks/{id}
///
/// Cancel a `pending` or `processing` task. Returns the cancelled task, or
/// 404 when the task is absent or already terminal (the cases are not
/// distinguished). Cancelling a `processing` task is best-effort: the
/// in-flight side effect may still occur.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let task = TaskRepo::cancel(&state.pool, task_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Task",
            id: task_id,
        }))?;

    tracing::info!(task_id, "Task cancelled");

    Ok(Json(TaskResponse { task }))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks
///
/// List tasks, newest first. Supports optional `status` and `task_type`
/// filters plus `limit` / `offset` pagination; `total` counts all rows
/// matching the filters.
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskListQuery>,
) -> AppResult<impl IntoResponse> {
    if params.limit.is_some_and(|l| l < 0) {
        return Err(AppError::BadRequest("limit must be non-negative".to_string()));
    }
    if params.offset.is_some_and(|o| o < 0) {
        return Err(AppError::BadRequest("offset must be non-negative".to_string()));
    }

    let (tasks, total) = TaskRepo::list(&state.pool, &params).await?;

    Ok(Json(TaskListResponse { tasks, total }))
}
