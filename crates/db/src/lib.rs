//! Database layer for the deferq task scheduler.
//!
//! Owns the connection pool, embedded migrations, row models, and the
//! repository that implements the queue primitives (lease, settle, sweep).

pub mod config;
pub mod models;
pub mod repositories;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

pub type DbPool = sqlx::PgPool;

/// Maximum number of open connections in the pool.
const POOL_MAX_CONNECTIONS: u32 = 25;

/// Connections kept open while idle.
const POOL_MIN_CONNECTIONS: u32 = 5;

/// Maximum lifetime of a single connection.
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(5 * 60);

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(POOL_MAX_CONNECTIONS)
        .min_connections(POOL_MIN_CONNECTIONS)
        .max_lifetime(POOL_MAX_LIFETIME)
        .connect(database_url)
        .await
}

/// Verify the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply all pending migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
