//! Background job queue and cron scheduler
//!
//! Jobs live in the shared database so the API process can enqueue and the
//! worker process can consume. Payloads are JSON copies taken at enqueue
//! time and never change afterwards.

pub mod cron;
pub mod scheduler;
mod selector;
mod store;
mod tasks;
mod types;

pub use scheduler::{CronEntry, Scheduler, default_entries};
pub use selector::QueueSelector;
pub use store::{FailOutcome, JobStore};
pub use tasks::*;
pub use types::*;

use crate::db::repository::RepoError;
use shared::error::{AppError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid payload: {0}")]
    Payload(serde_json::Error),

    #[error("Invalid cron expression {0}")]
    InvalidCron(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {0} is not dead-lettered")]
    NotDead(String),

    #[error("Corrupt job row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => AppError::not_found(format!("Job {id}")),
            JobError::NotDead(id) => {
                AppError::with_message(ErrorCode::InvalidRequest, format!("Job {id} is not dead-lettered"))
            }
            JobError::Repo(e) => e.into(),
            e => {
                tracing::error!(error = %e, "Job queue error");
                AppError::new(ErrorCode::InternalError)
            }
        }
    }
}

pub type JobResult<T> = Result<T, JobError>;
