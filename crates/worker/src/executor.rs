//! Side-effect executors keyed by task type.
//!
//! Each execution consumes the task's payload and reports an outcome; the
//! worker turns outcomes into settlements. Executors never touch the store.
//!
//! Built-in types:
//! - `http_callback` -- HTTP request to a payload-supplied URL.
//! - `email`         -- SMTP delivery (when `SMTP_HOST` is configured).
//! - `rabbitmq`      -- reserved, returns a terminal error.
//!
//! Unknown types fail terminally once the retry budget is spent; the
//! attempt was already consumed at claim time.

use std::time::Duration;

use serde::Deserialize;

use deferq_core::types::DbId;
use deferq_db::models::task::Task;

use crate::config::SmtpConfig;

/// HTTP request timeout for a single callback attempt. Kept well under the
/// worker's per-task execution deadline.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Response bodies longer than this are truncated in failure diagnostics.
const MAX_ERROR_BODY_LEN: usize = 1024;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of one execution attempt.
///
/// On success, `message` carries the executor output (for HTTP callbacks,
/// the response body); on failure it carries the diagnostic. Either way it
/// ends up in the task's `error_message` column.
#[derive(Debug)]
pub struct TaskOutcome {
    pub task_id: DbId,
    pub success: bool,
    pub message: String,
}

impl TaskOutcome {
    pub fn success(task_id: DbId, message: impl Into<String>) -> Self {
        Self {
            task_id,
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(task_id: DbId, message: impl Into<String>) -> Self {
        Self {
            task_id,
            success: false,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Payload schema for `http_callback` tasks.
#[derive(Debug, Deserialize)]
struct HttpCallbackPayload {
    url: String,
    /// One of POST, PUT, GET, DELETE, PATCH. Defaults to POST.
    #[serde(default)]
    method: Option<String>,
    /// JSON-serialized into the request body when present.
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Payload schema for `email` tasks.
#[derive(Debug, Deserialize)]
struct EmailPayload {
    to: String,
    subject: String,
    body: String,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Routes tasks to their side effect by `task_type`.
pub struct Executor {
    http: reqwest::Client,
    smtp: Option<SmtpConfig>,
}

impl Executor {
    /// Create an executor with a pre-configured HTTP client and, when
    /// given an SMTP relay, a working `email` type.
    pub fn new(smtp: Option<SmtpConfig>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self { http, smtp }
    }

    /// Execute one task attempt and report the outcome.
    pub async fn execute(&self, task: &Task) -> TaskOutcome {
        tracing::debug!(task_id = task.id, task_type = %task.task_type, "Executing task");

        match task.task_type.as_str() {
            "http_callback" => self.execute_http_callback(task).await,
            "email" => self.execute_email(task).await,
            // Reserved type; no AMQP client is wired up.
            "rabbitmq" => TaskOutcome::failure(task.id, "RabbitMQ execution not implemented"),
            other => TaskOutcome::failure(task.id, format!("unknown task type: {other}")),
        }
    }

    /// Send an HTTP request to the payload-supplied URL.
    ///
    /// Success iff the response status is 2xx. The response body is read in
    /// both cases: on success it becomes the outcome message, on failure it
    /// is embedded (truncated) in the diagnostic.
    async fn execute_http_callback(&self, task: &Task) -> TaskOutcome {
        let payload: HttpCallbackPayload = match serde_json::from_value(task.payload.clone()) {
            Ok(p) => p,
            Err(e) => return TaskOutcome::failure(task.id, format!("failed to parse payload: {e}")),
        };

        let method = match payload.method.as_deref().unwrap_or("POST") {
            "POST" => reqwest::Method::POST,
            "PUT" => reqwest::Method::PUT,
            "GET" => reqwest::Method::GET,
            "DELETE" => reqwest::Method::DELETE,
            "PATCH" => reqwest::Method::PATCH,
            other => {
                return TaskOutcome::failure(
                    task.id,
                    format!("invalid method '{other}', allowed: POST, PUT, GET, DELETE, PATCH"),
                )
            }
        };

        // The JSON content type is set unconditionally, for GET requests
        // too; callback receivers expect a uniform content type.
        let mut request = self
            .http
            .request(method, &payload.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(data) = &payload.data {
            match serde_json::to_vec(data) {
                Ok(body) => request = request.body(body),
                Err(e) => {
                    return TaskOutcome::failure(task.id, format!("failed to serialize data: {e}"))
                }
            }
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                return TaskOutcome::failure(task.id, format!("failed to execute request: {e}"))
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                return TaskOutcome::failure(
                    task.id,
                    format!("failed to read response body: {e}"),
                )
            }
        };

        if !status.is_success() {
            return TaskOutcome::failure(
                task.id,
                format!(
                    "HTTP request failed with status: {}, body: {}",
                    status.as_u16(),
                    truncate_body(&body),
                ),
            );
        }

        tracing::debug!(task_id = task.id, status = status.as_u16(), "Callback delivered");

        // The response body is recorded as the last output even on success.
        TaskOutcome::success(task.id, body)
    }

    /// Deliver a plain-text email via the configured SMTP relay.
    ///
    /// Address, message-build, and transport failures all settle as
    /// diagnostic strings, like every other executor outcome.
    async fn execute_email(&self, task: &Task) -> TaskOutcome {
        use lettre::{
            message::header::ContentType, message::Mailbox,
            transport::smtp::authentication::Credentials, AsyncSmtpTransport, AsyncTransport,
            Message, Tokio1Executor,
        };

        let Some(smtp) = &self.smtp else {
            return TaskOutcome::failure(task.id, "email delivery is not configured");
        };

        let payload: EmailPayload = match serde_json::from_value(task.payload.clone()) {
            Ok(p) => p,
            Err(e) => return TaskOutcome::failure(task.id, format!("failed to parse payload: {e}")),
        };

        let sender = match smtp.sender.parse::<Mailbox>() {
            Ok(mailbox) => mailbox,
            Err(e) => {
                return TaskOutcome::failure(
                    task.id,
                    format!("invalid sender address '{}': {e}", smtp.sender),
                )
            }
        };
        let recipient = match payload.to.parse::<Mailbox>() {
            Ok(mailbox) => mailbox,
            Err(e) => {
                return TaskOutcome::failure(
                    task.id,
                    format!("invalid recipient address '{}': {e}", payload.to),
                )
            }
        };

        let message = match Message::builder()
            .from(sender)
            .to(recipient)
            .subject(payload.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(payload.body.clone())
        {
            Ok(m) => m,
            Err(e) => return TaskOutcome::failure(task.id, format!("failed to build email: {e}")),
        };

        let transport = match AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.relay) {
            Ok(builder) => {
                let builder = builder.port(smtp.port);
                let builder = match (&smtp.user, &smtp.password) {
                    (Some(user), Some(password)) => {
                        builder.credentials(Credentials::new(user.clone(), password.clone()))
                    }
                    _ => builder,
                };
                builder.build()
            }
            Err(e) => {
                return TaskOutcome::failure(
                    task.id,
                    format!("failed to set up SMTP relay '{}': {e}", smtp.relay),
                )
            }
        };

        match transport.send(message).await {
            Ok(_) => TaskOutcome::success(task.id, format!("email sent to {}", payload.to)),
            Err(e) => TaskOutcome::failure(task.id, format!("failed to send email: {e}")),
        }
    }
}

/// Cap a response body for inclusion in a diagnostic, respecting UTF-8
/// boundaries.
fn truncate_body(body: &str) -> &str {
    if body.len() <= MAX_ERROR_BODY_LEN {
        return body;
    }
    let mut end = MAX_ERROR_BODY_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
