//! Integration tests for the scheduled-task repository: queue leasing,
//! settlement, sweeping, and the admission CRUD operations.

use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::PgPool;

use deferq_db::models::status::TaskStatus;
use deferq_db::models::task::{CreateTask, TaskListQuery};
use deferq_db::repositories::task_repo::MAX_ATTEMPTS_MESSAGE;
use deferq_db::repositories::TaskRepo;

/// Insert a task whose firing time already passed `age_secs` ago.
///
/// Admission validation lives in the API layer, so the repository happily
/// accepts past firing times; tests rely on that to make tasks due.
async fn create_due_task(
    pool: &PgPool,
    task_type: &str,
    max_attempts: i32,
    age_secs: i64,
) -> deferq_db::models::task::Task {
    TaskRepo::create(
        pool,
        &CreateTask {
            execute_at: Utc::now() - Duration::seconds(age_secs),
            task_type: task_type.to_string(),
            payload: json!({"url": "http://callback.test/hook"}),
            max_attempts: Some(max_attempts),
        },
    )
    .await
    .expect("task creation should succeed")
}

/// Force a task into `processing` with a backdated lease, simulating a
/// worker that claimed it and then died.
async fn orphan_task(pool: &PgPool, id: i64, attempts: i32, age_mins: i32) {
    sqlx::query(
        "UPDATE scheduled_tasks \
         SET status = 'processing', attempts = $2, \
             updated_at = NOW() - make_interval(mins => $3) \
         WHERE id = $1",
    )
    .bind(id)
    .bind(attempts)
    .bind(age_mins)
    .execute(pool)
    .await
    .expect("orphan setup should succeed");
}

// ---------------------------------------------------------------------------
// Create / fetch
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn create_starts_pending_with_zero_attempts(pool: PgPool) {
    let task = create_due_task(&pool, "http_callback", 3, 5).await;

    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.attempts, 0);
    assert_eq!(task.max_attempts, 3);
    assert!(task.error_message.is_none());
    assert!(task.completed_at.is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn create_defaults_max_attempts_to_three(pool: PgPool) {
    let input = CreateTask {
        execute_at: Utc::now() + Duration::hours(1),
        task_type: "email".to_string(),
        payload: json!({}),
        max_attempts: None,
    };
    let task = TaskRepo::create(&pool, &input).await.unwrap();
    assert_eq!(task.max_attempts, 3);

    let zero = CreateTask {
        max_attempts: Some(0),
        ..input
    };
    let task = TaskRepo::create(&pool, &zero).await.unwrap();
    assert_eq!(task.max_attempts, 3, "0 should fall back to the default");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn find_by_id_returns_none_for_missing(pool: PgPool) {
    assert!(TaskRepo::find_by_id(&pool, 424242).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Leasing
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn lease_marks_processing_and_consumes_an_attempt(pool: PgPool) {
    let created = create_due_task(&pool, "http_callback", 3, 5).await;

    let leased = TaskRepo::lease_due_batch(&pool, 10).await.unwrap();
    assert_eq!(leased.len(), 1);
    assert_eq!(leased[0].id, created.id);
    assert_eq!(leased[0].status, TaskStatus::Processing);
    assert_eq!(leased[0].attempts, 1);

    // Once leased, the task is invisible to further leases.
    let again = TaskRepo::lease_due_batch(&pool, 10).await.unwrap();
    assert!(again.is_empty());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn lease_prefers_older_firing_times(pool: PgPool) {
    let newest = create_due_task(&pool, "http_callback", 3, 10).await;
    let oldest = create_due_task(&pool, "http_callback", 3, 30).await;
    let middle = create_due_task(&pool, "http_callback", 3, 20).await;

    let leased = TaskRepo::lease_due_batch(&pool, 2).await.unwrap();
    let ids: Vec<i64> = leased.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![oldest.id, middle.id]);

    // The newest due task waits for the next poll.
    let remaining = TaskRepo::lease_due_batch(&pool, 2).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, newest.id);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn lease_skips_future_and_non_pending_tasks(pool: PgPool) {
    // Future task.
    TaskRepo::create(
        &pool,
        &CreateTask {
            execute_at: Utc::now() + Duration::hours(1),
            task_type: "http_callback".to_string(),
            payload: json!({}),
            max_attempts: None,
        },
    )
    .await
    .unwrap();

    // Cancelled due task.
    let cancelled = create_due_task(&pool, "http_callback", 3, 5).await;
    TaskRepo::cancel(&pool, cancelled.id).await.unwrap();

    let leased = TaskRepo::lease_due_batch(&pool, 10).await.unwrap();
    assert!(leased.is_empty());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn concurrent_leases_never_hand_out_the_same_task(pool: PgPool) {
    for i in 0..10 {
        create_due_task(&pool, "http_callback", 3, 60 + i).await;
    }

    let (a, b) = tokio::join!(
        TaskRepo::lease_due_batch(&pool, 5),
        TaskRepo::lease_due_batch(&pool, 5),
    );
    let a = a.unwrap();
    let b = b.unwrap();

    assert_eq!(a.len() + b.len(), 10, "both leases together drain the due set");

    let mut all: Vec<i64> = a.iter().chain(b.iter()).map(|t| t.id).collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 10, "no task may be claimed by both leases");
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn complete_records_output_and_completed_at(pool: PgPool) {
    let created = create_due_task(&pool, "http_callback", 3, 5).await;
    TaskRepo::lease_due_batch(&pool, 1).await.unwrap();

    assert!(TaskRepo::complete(&pool, created.id, "OK").await.unwrap());

    let task = TaskRepo::find_by_id(&pool, created.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.error_message.as_deref(), Some("OK"));
    assert!(task.completed_at.is_some());
    assert_eq!(task.attempts, 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn retry_returns_task_to_pending_for_immediate_re_lease(pool: PgPool) {
    let created = create_due_task(&pool, "http_callback", 3, 5).await;
    TaskRepo::lease_due_batch(&pool, 1).await.unwrap();

    assert!(TaskRepo::retry(&pool, created.id, "boom").await.unwrap());

    let task = TaskRepo::find_by_id(&pool, created.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.error_message.as_deref(), Some("boom"));
    assert!(task.completed_at.is_none());

    // execute_at is unchanged and in the past, so the very next poll may
    // pick the task up again.
    let leased = TaskRepo::lease_due_batch(&pool, 1).await.unwrap();
    assert_eq!(leased.len(), 1);
    assert_eq!(leased[0].attempts, 2);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn fail_is_terminal_and_respects_the_retry_budget(pool: PgPool) {
    let created = create_due_task(&pool, "http_callback", 2, 5).await;

    // Burn through the budget: lease + retry, lease + fail.
    TaskRepo::lease_due_batch(&pool, 1).await.unwrap();
    TaskRepo::retry(&pool, created.id, "first failure").await.unwrap();
    TaskRepo::lease_due_batch(&pool, 1).await.unwrap();

    let (attempts, max_attempts) = TaskRepo::attempt_counts(&pool, created.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((attempts, max_attempts), (2, 2));

    assert!(TaskRepo::fail(&pool, created.id, "second failure").await.unwrap());

    let task = TaskRepo::find_by_id(&pool, created.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.completed_at.is_some());
    assert!(task.attempts <= task.max_attempts);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn settlement_does_not_overwrite_a_cancelled_task(pool: PgPool) {
    let created = create_due_task(&pool, "http_callback", 3, 5).await;
    TaskRepo::lease_due_batch(&pool, 1).await.unwrap();

    // Cancel lands while the executor is still running.
    TaskRepo::cancel(&pool, created.id).await.unwrap();

    assert!(!TaskRepo::complete(&pool, created.id, "OK").await.unwrap());

    let task = TaskRepo::find_by_id(&pool, created.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn cancel_applies_once_then_reports_not_found(pool: PgPool) {
    let created = create_due_task(&pool, "http_callback", 3, 5).await;

    let first = TaskRepo::cancel(&pool, created.id).await.unwrap();
    assert_eq!(first.unwrap().status, TaskStatus::Cancelled);

    let second = TaskRepo::cancel(&pool, created.id).await.unwrap();
    assert!(second.is_none(), "cancel of a terminal task is a no-op");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn cancel_missing_task_returns_none(pool: PgPool) {
    assert!(TaskRepo::cancel(&pool, 424242).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn list_filters_by_status_and_task_type(pool: PgPool) {
    create_due_task(&pool, "http_callback", 3, 5).await;
    create_due_task(&pool, "email", 3, 5).await;
    let cancelled = create_due_task(&pool, "email", 3, 5).await;
    TaskRepo::cancel(&pool, cancelled.id).await.unwrap();

    let (all, total) = TaskRepo::list(&pool, &TaskListQuery::default()).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(total, 3);

    let (emails, total) = TaskRepo::list(
        &pool,
        &TaskListQuery {
            task_type: Some("email".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(emails.len(), 2);
    assert_eq!(total, 2);

    let (cancelled_emails, total) = TaskRepo::list(
        &pool,
        &TaskListQuery {
            status: Some(TaskStatus::Cancelled),
            task_type: Some("email".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(cancelled_emails.len(), 1);
    assert_eq!(total, 1);
    assert_eq!(cancelled_emails[0].id, cancelled.id);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn list_paginates_newest_first_with_stable_total(pool: PgPool) {
    for i in 0..5 {
        create_due_task(&pool, "http_callback", 3, i).await;
    }

    let (page_one, total) = TaskRepo::list(
        &pool,
        &TaskListQuery {
            limit: Some(2),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(page_one.len(), 2);
    assert_eq!(total, 5, "total reflects the filter, not the page");
    assert!(page_one[0].created_at >= page_one[1].created_at);

    let (page_three, _) = TaskRepo::list(
        &pool,
        &TaskListQuery {
            limit: Some(2),
            offset: Some(4),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(page_three.len(), 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn list_caps_limit_at_one_hundred(pool: PgPool) {
    create_due_task(&pool, "http_callback", 3, 5).await;

    // A limit over the cap must not error; it is clamped server-side.
    let (tasks, _) = TaskRepo::list(
        &pool,
        &TaskListQuery {
            limit: Some(10_000),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(tasks.len(), 1);
}

// ---------------------------------------------------------------------------
// Sweeping
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn sweep_restores_stuck_task_without_touching_attempts(pool: PgPool) {
    let created = create_due_task(&pool, "http_callback", 3, 5).await;
    orphan_task(&pool, created.id, 1, 10).await;

    let restored = TaskRepo::restore_stuck(&pool, std::time::Duration::from_secs(5 * 60))
        .await
        .unwrap();
    assert_eq!(restored, vec![created.id]);

    let task = TaskRepo::find_by_id(&pool, created.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.attempts, 1, "the crashed attempt already consumed its slot");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn sweep_fails_stuck_task_with_exhausted_budget(pool: PgPool) {
    let created = create_due_task(&pool, "http_callback", 3, 5).await;
    orphan_task(&pool, created.id, 3, 10).await;

    let failed = TaskRepo::fail_exhausted(&pool, std::time::Duration::from_secs(5 * 60))
        .await
        .unwrap();
    assert_eq!(failed, vec![created.id]);

    let task = TaskRepo::find_by_id(&pool, created.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_message.as_deref(), Some(MAX_ATTEMPTS_MESSAGE));
    assert!(task.completed_at.is_some());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn sweep_leaves_live_leases_alone(pool: PgPool) {
    let created = create_due_task(&pool, "http_callback", 3, 5).await;
    TaskRepo::lease_due_batch(&pool, 1).await.unwrap();

    let restored = TaskRepo::restore_stuck(&pool, std::time::Duration::from_secs(5 * 60))
        .await
        .unwrap();
    let failed = TaskRepo::fail_exhausted(&pool, std::time::Duration::from_secs(5 * 60))
        .await
        .unwrap();
    assert!(restored.is_empty());
    assert!(failed.is_empty());

    let task = TaskRepo::find_by_id(&pool, created.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Processing, "fresh lease must survive a sweep");
}
