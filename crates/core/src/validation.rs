//! Admission validation rules for scheduled tasks.
//!
//! Pure functions used by the API layer; they never touch the store.

use crate::error::CoreError;
use crate::types::Timestamp;

/// Retry budget applied when a request omits `max_attempts` or sends 0.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Maximum length of a task type discriminator (matches the VARCHAR(50) column).
pub const MAX_TASK_TYPE_LEN: usize = 50;

/// Validate a task type discriminator.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed [`MAX_TASK_TYPE_LEN`] characters.
pub fn validate_task_type(task_type: &str) -> Result<(), CoreError> {
    if task_type.is_empty() {
        return Err(CoreError::Validation("task_type is required".to_string()));
    }
    if task_type.len() > MAX_TASK_TYPE_LEN {
        return Err(CoreError::Validation(format!(
            "task_type must not exceed {MAX_TASK_TYPE_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate a firing time against the current instant.
///
/// A task scheduled at or before `now` would fire immediately, which the
/// admission contract rejects.
pub fn validate_execute_at(execute_at: Timestamp, now: Timestamp) -> Result<(), CoreError> {
    if execute_at <= now {
        return Err(CoreError::Validation(
            "execute_at must be in the future".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
