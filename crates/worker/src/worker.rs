//! The polling worker: lease, execute, settle.
//!
//! Each poll leases up to one batch of due tasks (claim-time attempt
//! increment, `FOR UPDATE SKIP LOCKED` under the hood), fans the batch out
//! into concurrent executions bounded by a per-task deadline, and settles
//! every result. Per-task errors never escape the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use deferq_db::repositories::TaskRepo;
use deferq_db::DbPool;

use crate::config::WorkerConfig;
use crate::executor::{Executor, TaskOutcome};

/// A single polling worker.
///
/// Multiple instances (in one process or across hosts) safely share a
/// database; the lease statement partitions the due set between them.
pub struct Worker {
    pool: DbPool,
    executor: Arc<Executor>,
    worker_id: String,
    polling_interval: Duration,
    batch_size: i64,
    execute_timeout: Duration,
}

impl Worker {
    pub fn new(pool: DbPool, config: &WorkerConfig) -> Self {
        Self {
            pool,
            executor: Arc::new(Executor::new(config.smtp.clone())),
            worker_id: config.worker_id.clone(),
            polling_interval: config.polling_interval,
            batch_size: config.batch_size,
            execute_timeout: config.execute_timeout,
        }
    }

    /// Run the polling loop until the cancellation token is triggered.
    ///
    /// On cancellation the loop stops issuing polls; a batch in flight is
    /// dropped mid-execution and its tasks are later recovered by the
    /// sweeper, which the at-least-once contract tolerates.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.polling_interval);
        tracing::info!(
            worker_id = %self.worker_id,
            polling_interval_secs = self.polling_interval.as_secs(),
            batch_size = self.batch_size,
            "Worker started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(worker_id = %self.worker_id, "Worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.process_batch().await {
                        tracing::error!(worker_id = %self.worker_id, error = %e, "Poll cycle failed");
                    }
                }
            }
        }
    }

    /// One poll: lease a batch, execute it concurrently, settle the results.
    ///
    /// Returns the number of tasks processed. Public so integration tests
    /// can drive the worker deterministically without the timer loop.
    pub async fn process_batch(&self) -> Result<usize, sqlx::Error> {
        let tasks = TaskRepo::lease_due_batch(&self.pool, self.batch_size).await?;
        if tasks.is_empty() {
            return Ok(0);
        }

        let count = tasks.len();
        tracing::info!(worker_id = %self.worker_id, count, "Leased due tasks");

        let mut executions = JoinSet::new();
        for task in tasks {
            let executor = Arc::clone(&self.executor);
            let deadline = self.execute_timeout;
            executions.spawn(async move {
                match tokio::time::timeout(deadline, executor.execute(&task)).await {
                    Ok(outcome) => outcome,
                    Err(_) => TaskOutcome::failure(
                        task.id,
                        format!("execution timed out after {}s", deadline.as_secs()),
                    ),
                }
            });
        }

        while let Some(joined) = executions.join_next().await {
            match joined {
                Ok(outcome) => {
                    if let Err(e) = self.settle(outcome).await {
                        tracing::error!(worker_id = %self.worker_id, error = %e, "Settlement failed");
                    }
                }
                Err(e) => {
                    tracing::error!(worker_id = %self.worker_id, error = %e, "Execution task panicked");
                }
            }
        }

        Ok(count)
    }

    /// Settle one outcome: completed, back to pending for retry, or failed.
    ///
    /// The attempts check reads fresh counters from the store rather than
    /// the leased row, so a concurrent sweep is accounted for.
    async fn settle(&self, outcome: TaskOutcome) -> Result<(), sqlx::Error> {
        let task_id = outcome.task_id;

        if outcome.success {
            if TaskRepo::complete(&self.pool, task_id, &outcome.message).await? {
                tracing::info!(worker_id = %self.worker_id, task_id, "Task completed");
            } else {
                tracing::warn!(
                    worker_id = %self.worker_id,
                    task_id,
                    "Task no longer processing at settlement (cancelled or swept); effect already occurred",
                );
            }
            return Ok(());
        }

        let Some((attempts, max_attempts)) = TaskRepo::attempt_counts(&self.pool, task_id).await?
        else {
            tracing::warn!(worker_id = %self.worker_id, task_id, "Task vanished before settlement");
            return Ok(());
        };

        if attempts >= max_attempts {
            if TaskRepo::fail(&self.pool, task_id, &outcome.message).await? {
                tracing::warn!(
                    worker_id = %self.worker_id,
                    task_id,
                    attempts,
                    error = %outcome.message,
                    "Task failed terminally (max attempts reached)",
                );
            }
        } else if TaskRepo::retry(&self.pool, task_id, &outcome.message).await? {
            tracing::warn!(
                worker_id = %self.worker_id,
                task_id,
                attempt = attempts,
                max_attempts,
                error = %outcome.message,
                "Task failed, returned to pending for retry",
            );
        }

        Ok(())
    }
}
