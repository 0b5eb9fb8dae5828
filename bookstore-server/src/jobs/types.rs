//! Job queue types

use super::{JobError, JobResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Retries before a job is dead-lettered, unless the task says otherwise
pub const DEFAULT_MAX_RETRY: i64 = 3;
/// Per-attempt timeout, unless the task says otherwise
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Base of the exponential retry delay
pub const RETRY_BASE: Duration = Duration::from_secs(60);

/// Priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    High,
    Default,
    Low,
    Notification,
    Auth,
    Promotion,
}

impl Queue {
    pub const ALL: [Queue; 6] = [
        Queue::High,
        Queue::Notification,
        Queue::Default,
        Queue::Low,
        Queue::Auth,
        Queue::Promotion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Default => "default",
            Self::Low => "low",
            Self::Notification => "notification",
            Self::Auth => "auth",
            Self::Promotion => "promotion",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|q| q.as_str() == s)
    }

    /// Share of polls this queue receives
    pub fn weight(&self) -> i64 {
        match self {
            Self::High => 20,
            Self::Notification => 17,
            Self::Default => 10,
            Self::Low | Self::Auth | Self::Promotion => 5,
        }
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    /// Retries exhausted; kept for inspection and manual requeue
    Dead,
    Cancelled,
}

impl JobStatus {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "dead" => Some(Self::Dead),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Dead => "dead",
            Self::Cancelled => "cancelled",
        }
    }
}

/// How far a dedup key reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupScope {
    /// At most one pending or running job per key
    #[default]
    Active,
    /// At most one job per key, ever (cron ticks)
    Always,
}

/// Per-enqueue options
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueOptions {
    pub queue: Queue,
    pub max_retry: i64,
    pub timeout: Duration,
    /// Earliest run time (Unix millis); `None` runs as soon as possible
    pub not_before: Option<i64>,
    pub dedup_key: Option<String>,
    pub dedup_scope: DedupScope,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            queue: Queue::Default,
            max_retry: DEFAULT_MAX_RETRY,
            timeout: DEFAULT_TIMEOUT,
            not_before: None,
            dedup_key: None,
            dedup_scope: DedupScope::Active,
        }
    }
}

impl EnqueueOptions {
    pub fn queue(mut self, queue: Queue) -> Self {
        self.queue = queue;
        self
    }

    pub fn max_retry(mut self, n: i64) -> Self {
        self.max_retry = n;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn not_before(mut self, at_millis: i64) -> Self {
        self.not_before = Some(at_millis);
        self
    }

    pub fn dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn dedup_scope(mut self, scope: DedupScope) -> Self {
        self.dedup_scope = scope;
        self
    }
}

/// A task ready to be enqueued. The payload is a by-value JSON copy.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub task_type: String,
    pub payload: serde_json::Value,
    pub options: EnqueueOptions,
}

impl NewTask {
    pub fn new<P: Serialize>(task_type: &str, payload: &P, options: EnqueueOptions) -> JobResult<Self> {
        Ok(Self {
            task_type: task_type.to_string(),
            payload: serde_json::to_value(payload).map_err(JobError::Payload)?,
            options,
        })
    }
}

/// A persisted job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub queue: Queue,
    pub status: JobStatus,
    /// Retries already scheduled (0 on the first attempt)
    pub retried: i64,
    pub max_retry: i64,
    pub timeout_secs: i64,
    pub not_before: i64,
    pub dedup_key: Option<String>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Job {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1) as u64)
    }

    /// Attempt number of the current run, starting at 1
    pub fn attempt(&self) -> i64 {
        self.retried + 1
    }

    pub fn is_last_attempt(&self) -> bool {
        self.retried >= self.max_retry
    }

    pub fn decode<T: DeserializeOwned>(&self) -> JobResult<T> {
        serde_json::from_value(self.payload.clone()).map_err(JobError::Payload)
    }
}

/// Delay before retry `n` (1-based): `base × 2^(n-1)`
pub fn backoff_delay(retry: i64) -> Duration {
    let exp = (retry.max(1) - 1).min(16) as u32;
    RETRY_BASE.saturating_mul(1_u32 << exp)
}
