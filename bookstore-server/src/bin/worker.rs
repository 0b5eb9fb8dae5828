//! bookstore-worker: job consumer and cron scheduler
//!
//! Runs the worker pool, the scheduler and a keyspace purge loop until
//! ctrl-c, then drains in-flight tasks.

use std::sync::Arc;
use std::time::Duration;

use bookstore_server::config::Config;
use bookstore_server::db::DbService;
use bookstore_server::inventory::ReservationEngine;
use bookstore_server::jobs::{JobStore, Scheduler, default_entries};
use bookstore_server::keyspace::{DistributedLock, JsonCache, Keyspace, SqliteKeyspace};
use bookstore_server::logger;
use bookstore_server::notify::{EmailSender, HttpEmailSender, LogEmailSender, OutboxPublisher};
use bookstore_server::payments::PaymentCoordinator;
use bookstore_server::worker::{HandlerDeps, Worker, WorkerSettings, default_registry};
use tokio_util::sync::CancellationToken;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const KEYSPACE_PURGE_EVERY: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    logger::init_logger(&config.log_level, config.log_json, config.log_dir.as_deref())?;
    tracing::info!(environment = %config.environment, "Starting bookstore-worker");

    let db = DbService::new(&config.database_url).await?;
    let pool = db.pool.clone();
    let store = JobStore::new(pool.clone());
    let sqlite_keyspace = SqliteKeyspace::new(pool.clone());
    let keyspace: Arc<dyn Keyspace> = Arc::new(sqlite_keyspace.clone());

    let email: Arc<dyn EmailSender> = match &config.email_api_url {
        Some(url) => Arc::new(HttpEmailSender::new(
            url.clone(),
            config.email_api_key.clone(),
            config.email_from.clone(),
            config.timeouts.smtp,
        )),
        None => {
            tracing::warn!("EMAIL_API_URL not set, emails are only logged");
            Arc::new(LogEmailSender)
        }
    };

    let deps = HandlerDeps {
        pool: pool.clone(),
        jobs: store.clone(),
        engine: ReservationEngine::new(pool.clone()),
        payments: PaymentCoordinator::new(pool.clone(), store.clone(), &config),
        cache: JsonCache::new(keyspace.clone(), config.timeouts.keyspace),
        lock: DistributedLock::new(keyspace),
        email,
        publisher: Arc::new(OutboxPublisher::new(pool.clone())),
        promotion_sweep_limit: 0,
        notification_user_rate_cap: 0,
        smtp_timeout: Duration::ZERO,
    }
    .tuned(&config);

    let shutdown = CancellationToken::new();
    let worker = Worker::new(store.clone(), default_registry(&deps), WorkerSettings::from_config(&config));
    let scheduler = Scheduler::new(store, default_entries()?, shutdown.clone());

    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));
    let scheduler_handle = tokio::spawn(scheduler.run());

    let purge_shutdown = shutdown.clone();
    let purge_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(KEYSPACE_PURGE_EVERY);
        loop {
            tokio::select! {
                _ = purge_shutdown.cancelled() => break,
                _ = interval.tick() => match sqlite_keyspace.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => tracing::debug!(purged, "Expired keys purged"),
                    Err(e) => tracing::warn!(error = %e, "Keyspace purge failed"),
                },
            }
        }
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
    shutdown.cancel();

    worker_handle.await?;
    scheduler_handle.await?;
    purge_handle.await?;
    tracing::info!("bookstore-worker stopped");
    Ok(())
}
