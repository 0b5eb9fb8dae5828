//! Health check
//!
//! The database is required; a keyspace outage only degrades the service
//! (cache reads fall back to the store).

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;
use std::time::Instant;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/health", get(health))
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    database: CheckResult,
    keyspace: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl CheckResult {
    fn ok(started: Instant) -> Self {
        Self {
            status: "ok",
            latency_ms: Some(started.elapsed().as_millis() as u64),
            message: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            latency_ms: None,
            message: Some(message.into()),
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let timeouts = state.config.timeouts;

    let started = Instant::now();
    let database = match tokio::time::timeout(timeouts.health_db, state.db.ping()).await {
        Ok(Ok(())) => CheckResult::ok(started),
        Ok(Err(e)) => CheckResult::error(format!("Database error: {e}")),
        Err(_) => CheckResult::error("Database ping timed out"),
    };

    let started = Instant::now();
    let keyspace = match tokio::time::timeout(timeouts.keyspace, state.keyspace.ping()).await {
        Ok(Ok(())) => CheckResult::ok(started),
        Ok(Err(e)) => CheckResult::error(format!("Keyspace error: {e}")),
        Err(_) => CheckResult::error("Keyspace ping timed out"),
    };

    let (code, status) = match (database.is_ok(), keyspace.is_ok()) {
        (true, true) => (StatusCode::OK, "ok"),
        (true, false) => (StatusCode::OK, "degraded"),
        (false, _) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
    };
    if code != StatusCode::OK {
        tracing::warn!(database = ?database.message, "Health check failed");
    }

    (
        code,
        Json(HealthResponse {
            status,
            service: "bookstore-server",
            version: env!("CARGO_PKG_VERSION"),
            checks: HealthChecks { database, keyspace },
        }),
    )
}
