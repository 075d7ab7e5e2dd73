//! Route registration for the admission API.

pub mod health;
pub mod tasks;

use axum::Router;

use crate::state::AppState;

/// All routes mounted under `/api/v1`.
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/tasks", tasks::router())
}
