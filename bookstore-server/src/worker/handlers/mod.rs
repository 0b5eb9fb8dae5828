//! Task handlers, one module per task family

mod auth;
mod cart;
mod inventory;
mod notification;
mod order;
mod payment;

pub use auth::{CleanupExpiredTokens, SendEmailVerification};
pub use cart::{AutoReleaseReservation, ReleaseExpiredReservations, RemoveExpiredPromotions};
pub use inventory::SyncBookStock;
pub use notification::{CleanupOldNotifications, RetryFailedNotifications, SendPendingNotifications};
pub use order::{SendOrderConfirmation, TrackCheckout};
pub use payment::ExecuteRefund;

use super::HandlerRegistry;
use crate::config::Config;
use crate::inventory::ReservationEngine;
use crate::jobs::{self, JobStore};
use crate::keyspace::{DEFAULT_LEASE, DistributedLock, JsonCache, LockGuard};
use crate::notify::templates::Email;
use crate::notify::{EmailSender, NotificationPublisher, NotifyError};
use crate::payments::PaymentCoordinator;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// Everything the handlers reach for
#[derive(Clone)]
pub struct HandlerDeps {
    pub pool: SqlitePool,
    pub jobs: JobStore,
    pub engine: ReservationEngine,
    pub payments: PaymentCoordinator,
    pub cache: JsonCache,
    /// Keeps periodic sweeps from overlapping across worker processes
    pub lock: DistributedLock,
    pub email: Arc<dyn EmailSender>,
    pub publisher: Arc<dyn NotificationPublisher>,
    pub promotion_sweep_limit: i64,
    pub notification_user_rate_cap: usize,
    pub smtp_timeout: Duration,
}

impl HandlerDeps {
    /// Apply a config's tunables
    pub fn tuned(mut self, config: &Config) -> Self {
        self.promotion_sweep_limit = config.promotion_sweep_limit;
        self.notification_user_rate_cap = config.notification_user_rate_cap;
        self.smtp_timeout = config.timeouts.smtp;
        self
    }

    /// Send a rendered email under the provider timeout
    pub(crate) async fn send_email(&self, to: &str, email: &Email) -> Result<String, NotifyError> {
        tokio::time::timeout(self.smtp_timeout, self.email.send(to, &email.subject, &email.body_html))
            .await
            .map_err(|_| NotifyError::Unavailable(format!("no reply within {:?}", self.smtp_timeout)))?
    }

    /// Queue a cache refresh for each book; failures are logged only
    pub(crate) async fn resync_books(&self, book_ids: &[String]) {
        for book_id in book_ids {
            let queued = match jobs::sync_book_stock(book_id) {
                Ok(task) => self.jobs.enqueue(&task).await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = queued {
                tracing::warn!(book_id, error = %e, "Failed to enqueue stock sync");
            }
        }
    }

    /// Take the named sweep lock. A keyspace outage runs the sweep unguarded,
    /// since every step of a sweep is a guarded update.
    pub(crate) async fn begin_sweep(&self, name: &str) -> SweepLock {
        match self.lock.try_acquire(name, DEFAULT_LEASE).await {
            Ok(Some(guard)) => SweepLock::Held(guard),
            Ok(None) => {
                tracing::debug!(lock = name, "Sweep already running in another worker");
                SweepLock::Busy
            }
            Err(e) => {
                tracing::warn!(lock = name, error = %e, "Sweep lock unavailable, running unguarded");
                SweepLock::Unguarded
            }
        }
    }

    pub(crate) async fn end_sweep(&self, lock: SweepLock) {
        if let SweepLock::Held(guard) = lock {
            if let Err(e) = self.lock.release(guard).await {
                tracing::warn!(error = %e, "Failed to release sweep lock");
            }
        }
    }
}

/// Outcome of [`HandlerDeps::begin_sweep`]
pub(crate) enum SweepLock {
    Held(LockGuard),
    Unguarded,
    Busy,
}

impl SweepLock {
    pub(crate) fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// Every handler the worker process serves
pub fn default_registry(deps: &HandlerDeps) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(AutoReleaseReservation(deps.clone()));
    registry.register(ReleaseExpiredReservations(deps.clone()));
    registry.register(RemoveExpiredPromotions(deps.clone()));
    registry.register(SendOrderConfirmation(deps.clone()));
    registry.register(TrackCheckout(deps.clone()));
    registry.register(SyncBookStock(deps.clone()));
    registry.register(SendEmailVerification(deps.clone()));
    registry.register(CleanupExpiredTokens(deps.clone()));
    registry.register(SendPendingNotifications(deps.clone()));
    registry.register(RetryFailedNotifications(deps.clone()));
    registry.register(CleanupOldNotifications(deps.clone()));
    registry.register(ExecuteRefund(deps.clone()));
    registry
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::db::DbService;
    use crate::keyspace::MemoryKeyspace;
    use crate::notify::OutboxPublisher;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every email; fails while `down` is set
    #[derive(Default)]
    pub struct RecordingSender {
        pub sent: Mutex<Vec<(String, String)>>,
        pub down: std::sync::atomic::AtomicBool,
    }

    impl RecordingSender {
        pub fn sent_to(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(to, _)| to.clone()).collect()
        }

        pub fn subjects(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(_, s)| s.clone()).collect()
        }
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        async fn send(&self, to: &str, subject: &str, _body_html: &str) -> Result<String, NotifyError> {
            if self.down.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(NotifyError::Unavailable("connection refused".into()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((to.to_string(), subject.to_string()));
            Ok(format!("msg-{}", sent.len()))
        }
    }

    pub fn deps(db: &DbService, email: Arc<RecordingSender>) -> HandlerDeps {
        let config = Config::for_tests();
        let jobs = JobStore::new(db.pool.clone());
        let keyspace: Arc<dyn crate::keyspace::Keyspace> = Arc::new(MemoryKeyspace::new());
        HandlerDeps {
            pool: db.pool.clone(),
            jobs: jobs.clone(),
            engine: ReservationEngine::new(db.pool.clone()),
            payments: PaymentCoordinator::new(db.pool.clone(), jobs, &config),
            cache: JsonCache::new(keyspace.clone(), config.timeouts.keyspace),
            lock: DistributedLock::new(keyspace),
            email,
            publisher: Arc::new(OutboxPublisher::new(db.pool.clone())),
            promotion_sweep_limit: config.promotion_sweep_limit,
            notification_user_rate_cap: config.notification_user_rate_cap,
            smtp_timeout: config.timeouts.smtp,
        }
    }

    /// A claimed-looking job for calling a handler directly
    pub fn job(task_type: &str, payload: serde_json::Value) -> crate::jobs::Job {
        crate::jobs::Job {
            id: shared::util::new_id(),
            task_type: task_type.to_string(),
            payload,
            queue: crate::jobs::Queue::Default,
            status: crate::jobs::JobStatus::Running,
            retried: 0,
            max_retry: 3,
            timeout_secs: 30,
            not_before: 0,
            dedup_key: None,
            last_error: None,
            created_at: 0,
            updated_at: 0,
            completed_at: None,
        }
    }

    pub fn ctx() -> crate::context::RequestContext {
        crate::context::RequestContext::background("test-job", Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::jobs::task_types;
    use crate::test_support::memory_db;

    #[tokio::test]
    async fn every_task_type_has_a_handler() {
        let db = memory_db().await;
        let registry = default_registry(&deps(&db, Arc::default()));
        for t in [
            task_types::AUTO_RELEASE_RESERVATION,
            task_types::RELEASE_EXPIRED_RESERVATIONS,
            task_types::REMOVE_EXPIRED_PROMOTIONS,
            task_types::SEND_ORDER_CONFIRMATION,
            task_types::TRACK_CHECKOUT,
            task_types::SYNC_BOOK_STOCK,
            task_types::EMAIL_VERIFICATION,
            task_types::CLEANUP_EXPIRED_TOKENS,
            task_types::NOTIFICATION_SEND_PENDING,
            task_types::NOTIFICATION_RETRY_FAILED,
            task_types::NOTIFICATION_CLEANUP_OLD,
            task_types::EXECUTE_REFUND,
        ] {
            assert!(registry.get(t).is_some(), "no handler for {t}");
        }
        assert_eq!(registry.len(), 12);
    }
}
