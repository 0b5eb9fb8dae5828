//! Worker runtime and task handlers
//!
//! One handler per task type. Handlers must be idempotent: a task can run
//! again after a retry, a lease expiry or a duplicate cron tick.

pub mod handlers;
mod runtime;

pub use handlers::{HandlerDeps, default_registry};
pub use runtime::{JobOutcome, Worker, WorkerSettings};

use crate::context::{DeadlineExceeded, RequestContext};
use crate::db::Transient;
use crate::db::repository::RepoError;
use crate::inventory::InventoryError;
use crate::jobs::{Job, JobError};
use crate::notify::NotifyError;
use crate::orders::OrderError;
use crate::payments::PaymentError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Why a task run failed; decides between retry and dead-letter
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Retryable(String),

    #[error("{0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Retryable(_))
    }
}

impl From<JobError> for HandlerError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Payload(_) | JobError::Corrupt(_) => HandlerError::Permanent(err.to_string()),
            _ => HandlerError::Retryable(err.to_string()),
        }
    }
}

impl From<RepoError> for HandlerError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Busy(_) | RepoError::Database(_) => HandlerError::Retryable(err.to_string()),
            _ => HandlerError::Permanent(err.to_string()),
        }
    }
}

impl From<DeadlineExceeded> for HandlerError {
    fn from(err: DeadlineExceeded) -> Self {
        HandlerError::Retryable(err.to_string())
    }
}

impl From<InventoryError> for HandlerError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::Repo(e) => e.into(),
            e => HandlerError::Permanent(e.to_string()),
        }
    }
}

impl From<OrderError> for HandlerError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::Repo(e) => e.into(),
            OrderError::Timeout(e) => e.into(),
            OrderError::VersionConflict => HandlerError::Retryable(err.to_string()),
            e if e.is_transient() => HandlerError::Retryable(e.to_string()),
            e => HandlerError::Permanent(e.to_string()),
        }
    }
}

impl From<PaymentError> for HandlerError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Gateway(_) => HandlerError::Retryable(err.to_string()),
            PaymentError::Repo(e) => e.into(),
            PaymentError::Timeout(e) => e.into(),
            e if e.is_transient() => HandlerError::Retryable(e.to_string()),
            e => HandlerError::Permanent(e.to_string()),
        }
    }
}

impl From<NotifyError> for HandlerError {
    fn from(err: NotifyError) -> Self {
        if err.is_retryable() {
            HandlerError::Retryable(err.to_string())
        } else {
            HandlerError::Permanent(err.to_string())
        }
    }
}

pub type HandlerResult = Result<(), HandlerError>;

#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> &'static str;

    async fn handle(&self, job: &Job, ctx: &RequestContext) -> HandlerResult;
}

/// Task type → handler
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: impl TaskHandler + 'static) {
        let task_type = handler.task_type();
        if self.handlers.insert(task_type, Arc::new(handler)).is_some() {
            tracing::warn!(task_type, "Handler registered twice, keeping the last one");
        }
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn task_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
