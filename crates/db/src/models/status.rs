//! Task lifecycle status.
//!
//! The database column is TEXT constrained by a CHECK to exactly these five
//! values; the enum round-trips through sqlx as its lowercase string form.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a scheduled task.
///
/// ```text
/// pending -> processing -> completed | failed | pending (retry)
/// pending | processing -> cancelled
/// ```
///
/// `completed`, `failed`, and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// The lowercase string form stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Whether no further transitions may leave this status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether an admission cancel may apply to a task in this status.
    pub fn is_cancellable(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Processing)
    }
}
