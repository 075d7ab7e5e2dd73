//! Recovery loop for tasks orphaned by crashed workers.
//!
//! A task whose lease (`processing` + stale `updated_at`) outlives the
//! stuck timeout is either returned to `pending` (budget remaining) or
//! terminated as failed (budget exhausted). Both phases skip rows locked
//! by live workers mid-settlement.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use deferq_db::repositories::TaskRepo;
use deferq_db::DbPool;

pub struct Sweeper {
    pool: DbPool,
    interval: Duration,
    stuck_timeout: Duration,
}

impl Sweeper {
    pub fn new(pool: DbPool, interval: Duration, stuck_timeout: Duration) -> Self {
        Self {
            pool,
            interval,
            stuck_timeout,
        }
    }

    /// Run the sweep loop until the cancellation token is triggered.
    ///
    /// The first sweep happens immediately on start, so a restarted
    /// process recovers its own orphans without waiting a full interval.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            stuck_timeout_secs = self.stuck_timeout.as_secs(),
            "Sweeper started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "Sweep cycle failed");
                    }
                }
            }
        }
    }

    /// One sweep: restore stuck tasks with budget, fail the exhausted ones.
    ///
    /// Returns `(restored, failed)` counts. Public so tests can drive a
    /// sweep without the timer loop.
    pub async fn sweep(&self) -> Result<(usize, usize), sqlx::Error> {
        let restored = TaskRepo::restore_stuck(&self.pool, self.stuck_timeout).await?;
        for task_id in &restored {
            tracing::info!(task_id, "Restored stuck task to pending");
        }

        let failed = TaskRepo::fail_exhausted(&self.pool, self.stuck_timeout).await?;
        for task_id in &failed {
            tracing::warn!(task_id, "Stuck task exhausted its retry budget, marked failed");
        }

        if !restored.is_empty() || !failed.is_empty() {
            tracing::info!(
                restored = restored.len(),
                failed = failed.len(),
                "Sweep complete",
            );
        }

        Ok((restored.len(), failed.len()))
    }
}
