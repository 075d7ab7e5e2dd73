//! Response envelope types for API handlers.
//!
//! Single-task endpoints respond with `{ "task": … }`; the listing endpoint
//! responds with `{ "tasks": […], "total": n }`. Typed envelopes are used
//! instead of ad-hoc `serde_json::json!` for compile-time safety.

use serde::Serialize;

use deferq_db::models::task::Task;

/// `{ "task": … }` envelope for create / get / cancel.
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub task: Task,
}

/// `{ "tasks": […], "total": n }` envelope for listing.
///
/// `total` counts every row matching the filters, not just the page.
#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
    pub total: i64,
}
