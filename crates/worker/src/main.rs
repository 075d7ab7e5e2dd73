use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deferq_worker::config::WorkerConfig;
use deferq_worker::sweeper::Sweeper;
use deferq_worker::worker::Worker;

/// Bound on how long shutdown waits for the worker and sweeper loops.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deferq_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env();
    tracing::info!(
        worker_id = %config.worker_id,
        polling_interval_secs = config.polling_interval.as_secs(),
        batch_size = config.batch_size,
        execute_timeout_secs = config.execute_timeout.as_secs(),
        sweep_interval_secs = config.sweep_interval.as_secs(),
        stuck_timeout_secs = config.stuck_timeout.as_secs(),
        "Loaded worker configuration",
    );

    // --- Database ---
    let database_url = deferq_db::config::database_url();

    let pool = deferq_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    deferq_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    deferq_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Worker and sweeper loops ---
    let cancel = CancellationToken::new();

    let worker = Worker::new(pool.clone(), &config);
    let worker_cancel = cancel.clone();
    let worker_handle = tokio::spawn(async move { worker.run(worker_cancel).await });

    let sweeper = Sweeper::new(pool.clone(), config.sweep_interval, config.stuck_timeout);
    let sweeper_cancel = cancel.clone();
    let sweeper_handle = tokio::spawn(async move { sweeper.run(sweeper_cancel).await });

    tracing::info!("Worker and sweeper started");

    // --- Graceful shutdown ---
    shutdown_signal().await;
    cancel.cancel();

    // In-flight executions are not joined beyond this bound; their tasks
    // stay in `processing` and fall to a sweeper after the stuck timeout.
    let _ = tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, worker_handle).await;
    let _ = tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, sweeper_handle).await;

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the process
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
