//! Worker configuration loaded from environment variables.

use std::time::Duration;

/// Settings for the polling worker and the sweeper.
///
/// All fields have defaults suitable for local development; override via
/// environment variables in production.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker identity used in logs. Defaults to the host name so scaled
    /// deployments (e.g. `docker compose up --scale worker=4`) stay
    /// distinguishable.
    pub worker_id: String,
    /// How often the worker polls the store for due tasks (default: 5 s).
    pub polling_interval: Duration,
    /// Maximum tasks leased per poll (default: 10).
    pub batch_size: i64,
    /// Per-task execution deadline (default: 5 min).
    pub execute_timeout: Duration,
    /// How often the sweeper scans for stuck tasks (default: 5 min).
    pub sweep_interval: Duration,
    /// Age of a `processing` lease before it counts as stuck (default: 5 min).
    /// Must exceed `execute_timeout` with margin so live executions are
    /// never swept.
    pub stuck_timeout: Duration,
    /// SMTP relay for the `email` task type. `None` until `SMTP_HOST` is
    /// set; email tasks fail terminally in the meantime.
    pub smtp: Option<SmtpConfig>,
}

/// SMTP relay settings consumed by the `email` executor.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// Relay host (`SMTP_HOST`).
    pub relay: String,
    /// Relay port (`SMTP_PORT`, default 587, STARTTLS).
    pub port: u16,
    /// Sender address stamped on every outgoing message (`SMTP_FROM`).
    pub sender: String,
    /// Relay credentials (`SMTP_USER` / `SMTP_PASSWORD`). Authentication
    /// is attempted only when both are set.
    pub user: Option<String>,
    pub password: Option<String>,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Unit    | Default            |
    /// |---------------------------|---------|--------------------|
    /// | `WORKER_ID`               | -       | `$HOSTNAME` / `worker-1` |
    /// | `WORKER_POLLING_INTERVAL` | seconds | `5`                |
    /// | `WORKER_BATCH_SIZE`       | tasks   | `10`               |
    /// | `WORKER_EXECUTE_TIMEOUT`  | seconds | `300`              |
    /// | `WORKER_SWEEP_INTERVAL`   | minutes | `5`                |
    /// | `WORKER_STUCK_TIMEOUT`    | minutes | `5`                |
    /// | `SMTP_HOST`               | -       | (unset: email off) |
    /// | `SMTP_PORT`               | -       | `587`              |
    /// | `SMTP_FROM`               | -       | `deferq@localhost` |
    /// | `SMTP_USER` / `SMTP_PASSWORD` | -   | (unset: no auth)   |
    pub fn from_env() -> Self {
        let polling_interval: u64 = std::env::var("WORKER_POLLING_INTERVAL")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("WORKER_POLLING_INTERVAL must be a valid u64");

        let batch_size: i64 = std::env::var("WORKER_BATCH_SIZE")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("WORKER_BATCH_SIZE must be a valid i64");

        let execute_timeout: u64 = std::env::var("WORKER_EXECUTE_TIMEOUT")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("WORKER_EXECUTE_TIMEOUT must be a valid u64");

        let sweep_interval: u64 = std::env::var("WORKER_SWEEP_INTERVAL")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("WORKER_SWEEP_INTERVAL must be a valid u64");

        let stuck_timeout: u64 = std::env::var("WORKER_STUCK_TIMEOUT")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("WORKER_STUCK_TIMEOUT must be a valid u64");

        Self {
            worker_id: worker_id_from_env(),
            polling_interval: Duration::from_secs(polling_interval),
            batch_size,
            execute_timeout: Duration::from_secs(execute_timeout),
            sweep_interval: Duration::from_secs(sweep_interval * 60),
            stuck_timeout: Duration::from_secs(stuck_timeout * 60),
            smtp: smtp_from_env(),
        }
    }
}

/// Resolve the worker identity: `WORKER_ID`, then `HOSTNAME`, then a fixed
/// fallback.
fn worker_id_from_env() -> String {
    if let Ok(id) = std::env::var("WORKER_ID") {
        if !id.is_empty() {
            return id;
        }
    }
    if let Ok(hostname) = std::env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }
    "worker-1".to_string()
}

/// Load the SMTP relay settings, or `None` when `SMTP_HOST` is unset.
/// A malformed `SMTP_PORT` aborts startup.
fn smtp_from_env() -> Option<SmtpConfig> {
    let relay = std::env::var("SMTP_HOST").ok()?;

    let port: u16 = std::env::var("SMTP_PORT")
        .unwrap_or_else(|_| "587".into())
        .parse()
        .expect("SMTP_PORT must be a valid u16");

    Some(SmtpConfig {
        relay,
        port,
        sender: std::env::var("SMTP_FROM").unwrap_or_else(|_| "deferq@localhost".into()),
        user: std::env::var("SMTP_USER").ok(),
        password: std::env::var("SMTP_PASSWORD").ok(),
    })
}
