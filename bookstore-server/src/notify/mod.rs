//! Email and notification collaborators
//!
//! - [`EmailSender`]: `send(to, subject, body_html) -> message_id`
//! - [`NotificationPublisher`]: `publish(user_id, template, data)`, backed
//!   by the `notifications` outbox and drained by the `notification:*` tasks

pub mod templates;

use crate::db::repository::{RepoError, notifications};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::util::now_millis;
use sqlx::SqlitePool;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    /// Network failure, timeout, 5xx or throttling; worth retrying
    #[error("Email provider unavailable: {0}")]
    Unavailable(String),

    #[error("Email rejected: {0}")]
    Rejected(String),

    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl NotifyError {
    pub fn is_retryable(&self) -> bool {
        match self {
            NotifyError::Unavailable(_) => true,
            NotifyError::Repo(e) => !matches!(e, RepoError::NotFound(_) | RepoError::Duplicate(_)),
            _ => false,
        }
    }
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Returns the provider's message id
    async fn send(&self, to: &str, subject: &str, body_html: &str) -> Result<String, NotifyError>;
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

/// Transactional email over a JSON HTTP API (bearer key)
pub struct HttpEmailSender {
    client: reqwest::Client,
    url: String,
    api_key: String,
    from: String,
    timeout: Duration,
}

impl HttpEmailSender {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, from: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key: api_key.into(),
            from: from.into(),
            timeout,
        }
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, to: &str, subject: &str, body_html: &str) -> Result<String, NotifyError> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&SendRequest {
                from: &self.from,
                to,
                subject,
                html: body_html,
            })
            .send()
            .await
            .map_err(|e| NotifyError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(NotifyError::Unavailable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected(format!("HTTP {status}: {body}")));
        }
        let body: SendResponse = resp
            .json()
            .await
            .map_err(|e| NotifyError::Unavailable(format!("unreadable response: {e}")))?;

        tracing::info!(to, message_id = %body.id, "Email sent");
        Ok(body.id)
    }
}

/// Logs emails instead of sending them (development)
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, to: &str, subject: &str, _body_html: &str) -> Result<String, NotifyError> {
        let id = format!("log-{}", shared::util::new_id());
        tracing::info!(to, subject, message_id = %id, "Email logged (no provider configured)");
        Ok(id)
    }
}

#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    /// Queue a notification; returns its id
    async fn publish(&self, user_id: &str, template: &str, data: &Value) -> Result<String, NotifyError>;
}

/// Writes to the `notifications` outbox
#[derive(Clone)]
pub struct OutboxPublisher {
    pool: SqlitePool,
}

impl OutboxPublisher {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationPublisher for OutboxPublisher {
    async fn publish(&self, user_id: &str, template: &str, data: &Value) -> Result<String, NotifyError> {
        // fail at publish time rather than on every delivery attempt
        templates::render(template, data)?;
        let id = notifications::enqueue(&self.pool, user_id, template, data, now_millis()).await?;
        tracing::debug!(user_id, template, notification_id = %id, "Notification queued");
        Ok(id)
    }
}
