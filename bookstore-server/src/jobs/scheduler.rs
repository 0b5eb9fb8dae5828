//! Cron scheduler
//!
//! Sleeps until the next firing minute of any entry, then enqueues every
//! entry due at that minute. Each tick is enqueued under the dedup key
//! `cron:{type}:{fire_ts}`, so several scheduler instances never enqueue
//! the same tick twice.

use super::cron::{CronExpr, truncate_to_minute};
use super::task_types::*;
use super::{BatchPayload, DedupScope, EnqueueOptions, JobResult, JobStore, NewTask, Queue};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One recurring task
#[derive(Debug, Clone)]
pub struct CronEntry {
    pub task_type: &'static str,
    pub schedule: CronExpr,
    pub queue: Queue,
    pub max_retry: i64,
    pub timeout: Duration,
}

impl CronEntry {
    pub fn new(
        task_type: &'static str,
        schedule: &str,
        queue: Queue,
        max_retry: i64,
        timeout: Duration,
    ) -> JobResult<Self> {
        Ok(Self {
            task_type,
            schedule: CronExpr::parse(schedule)?,
            queue,
            max_retry,
            timeout,
        })
    }

    pub fn dedup_key(&self, fire_at: &DateTime<Utc>) -> String {
        format!("cron:{}:{}", self.task_type, fire_at.timestamp())
    }

    fn task(&self, fire_at: &DateTime<Utc>) -> JobResult<NewTask> {
        NewTask::new(
            self.task_type,
            &BatchPayload::default(),
            EnqueueOptions::default()
                .queue(self.queue)
                .max_retry(self.max_retry)
                .timeout(self.timeout)
                .not_before(fire_at.timestamp_millis())
                .dedup_key(self.dedup_key(fire_at))
                .dedup_scope(DedupScope::Always),
        )
    }
}

const MINUTE: u64 = 60;

/// The recurring schedule of the bookstore
pub fn default_entries() -> JobResult<Vec<CronEntry>> {
    Ok(vec![
        CronEntry::new(CLEANUP_EXPIRED_TOKENS, "0 2 * * *", Queue::Auth, 1, Duration::from_secs(5 * MINUTE))?,
        CronEntry::new(NOTIFICATION_CLEANUP_OLD, "0 3 * * *", Queue::Notification, 2, Duration::from_secs(10 * MINUTE))?,
        CronEntry::new(NOTIFICATION_SEND_PENDING, "0 7 * * *", Queue::Notification, 3, Duration::from_secs(2 * MINUTE))?,
        CronEntry::new(REMOVE_EXPIRED_PROMOTIONS, "0 */3 * * *", Queue::Promotion, 2, Duration::from_secs(10 * MINUTE))?,
        CronEntry::new(NOTIFICATION_RETRY_FAILED, "*/360 * * * *", Queue::Notification, 3, Duration::from_secs(5 * MINUTE))?,
        CronEntry::new(RELEASE_EXPIRED_RESERVATIONS, "*/5 * * * *", Queue::Default, 3, Duration::from_secs(2 * MINUTE))?,
    ])
}

pub struct Scheduler {
    store: JobStore,
    entries: Vec<CronEntry>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(store: JobStore, entries: Vec<CronEntry>, shutdown: CancellationToken) -> Self {
        Self {
            store,
            entries,
            shutdown,
        }
    }

    pub async fn run(self) {
        tracing::info!(entries = self.entries.len(), "Cron scheduler started");
        for e in &self.entries {
            tracing::debug!(task_type = e.task_type, schedule = %e.schedule, queue = %e.queue, "Cron entry registered");
        }

        loop {
            let now = Utc::now();
            let Some(next) = self.next_fire(&now) else {
                tracing::warn!("No cron entry will ever fire, scheduler stopping");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Cron scheduler received shutdown signal");
                    return;
                }
            }

            match self.tick(&next).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(fire_at = %next, enqueued = n, "Cron tick"),
                Err(e) => tracing::error!(fire_at = %next, error = %e, "Cron tick failed"),
            }
        }
    }

    fn next_fire(&self, now: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .filter_map(|e| e.schedule.next_after(now))
            .min()
    }

    /// Enqueue every entry due in the minute of `at`. Returns how many were
    /// newly enqueued.
    pub async fn tick(&self, at: &DateTime<Utc>) -> JobResult<usize> {
        let Some(fire_at) = truncate_to_minute(at) else {
            return Ok(0);
        };
        let mut enqueued = 0;
        for entry in self.entries.iter().filter(|e| e.schedule.matches(&fire_at)) {
            if self.store.enqueue(&entry.task(&fire_at)?).await?.is_some() {
                enqueued += 1;
            }
        }
        Ok(enqueued)
    }
}
