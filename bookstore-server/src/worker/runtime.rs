//! Polling loop
//!
//! A semaphore bounds the tasks in flight. Each round asks the weighted
//! selector for a poll order and claims the first due job found; the job
//! then runs on its own tokio task holding one permit.

use super::{HandlerError, HandlerRegistry};
use crate::config::Config;
use crate::context::RequestContext;
use crate::jobs::{FailOutcome, Job, JobResult, JobStore, QueueSelector};
use shared::util::now_millis;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub worker_id: String,
    pub concurrency: usize,
    /// Sleep between polls when every queue is empty
    pub poll_interval: Duration,
    /// Extra time past a job's timeout before its lease is considered lost
    pub stale_grace: Duration,
    pub recover_every: Duration,
    /// How long shutdown waits for in-flight tasks
    pub drain_timeout: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            worker_id: format!("worker-{}", shared::util::new_id()),
            concurrency: config.worker_concurrency.max(1),
            poll_interval: config.worker_poll_interval,
            stale_grace: Duration::from_secs(60),
            recover_every: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// What happened to one claimed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Retrying { not_before: i64 },
    Dead,
}

impl From<FailOutcome> for JobOutcome {
    fn from(outcome: FailOutcome) -> Self {
        match outcome {
            FailOutcome::Retrying { not_before } => JobOutcome::Retrying { not_before },
            FailOutcome::Dead => JobOutcome::Dead,
        }
    }
}

pub struct Worker {
    store: JobStore,
    registry: Arc<HandlerRegistry>,
    selector: Mutex<QueueSelector>,
    semaphore: Arc<Semaphore>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(store: JobStore, registry: HandlerRegistry, settings: WorkerSettings) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            selector: Mutex::new(QueueSelector::default()),
            semaphore: Arc::new(Semaphore::new(settings.concurrency)),
            settings,
        }
    }

    /// Poll until `shutdown` fires, then wait for in-flight tasks
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            worker_id = %self.settings.worker_id,
            concurrency = self.settings.concurrency,
            handlers = ?self.registry.task_types(),
            "Worker started"
        );
        self.recover().await;
        let mut last_recovery = tokio::time::Instant::now();

        loop {
            if last_recovery.elapsed() >= self.settings.recover_every {
                self.recover().await;
                last_recovery = tokio::time::Instant::now();
            }

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.claim().await {
                Ok(Some(job)) => {
                    let store = self.store.clone();
                    let registry = self.registry.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        execute(&store, &registry, job).await;
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.poll_interval) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = %e, "Polling failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.poll_interval.max(Duration::from_secs(1))) => {}
                    }
                }
            }
        }

        tracing::info!("Worker received shutdown signal, draining in-flight tasks");
        let all = self.settings.concurrency as u32;
        match tokio::time::timeout(self.settings.drain_timeout, self.semaphore.acquire_many(all)).await {
            Ok(_) => tracing::info!("Worker stopped"),
            // their leases expire and another worker picks them up
            Err(_) => tracing::warn!("Worker stopped with tasks still running"),
        }
    }

    /// Claim and run one job inline. `None` when every queue is empty.
    pub async fn process_next(&self) -> JobResult<Option<(Job, JobOutcome)>> {
        let Some(job) = self.claim().await? else {
            return Ok(None);
        };
        let outcome = execute(&self.store, &self.registry, job.clone()).await;
        Ok(Some((job, outcome)))
    }

    /// Run until every queue is empty (tests and one-shot tooling)
    pub async fn drain(&self) -> JobResult<Vec<(Job, JobOutcome)>> {
        let mut done = Vec::new();
        while let Some(step) = self.process_next().await? {
            done.push(step);
        }
        Ok(done)
    }

    async fn claim(&self) -> JobResult<Option<Job>> {
        let order = match self.selector.lock() {
            Ok(mut selector) => selector.poll_order(),
            Err(poisoned) => poisoned.into_inner().poll_order(),
        };
        let now = now_millis();
        for queue in order {
            if let Some(job) = self.store.claim_next(queue, &self.settings.worker_id, now).await? {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    async fn recover(&self) {
        let grace = self.settings.stale_grace.as_millis() as i64;
        if let Err(e) = self.store.recover_stale(now_millis(), grace).await {
            tracing::error!(error = %e, "Stale job recovery failed");
        }
    }
}

/// Run one claimed job and record its outcome
async fn execute(store: &JobStore, registry: &HandlerRegistry, job: Job) -> JobOutcome {
    let span = tracing::info_span!(
        "job",
        job_id = %job.id,
        task_type = %job.task_type,
        queue = %job.queue,
        attempt = job.attempt()
    );

    async move {
        let started = std::time::Instant::now();
        let result = match registry.get(&job.task_type) {
            None => Err(HandlerError::Permanent(format!("no handler for {}", job.task_type))),
            Some(handler) => {
                let ctx = RequestContext::background(&job.id, job.timeout());
                match tokio::time::timeout(job.timeout(), handler.handle(&job, &ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(HandlerError::Retryable(format!(
                        "timed out after {}s",
                        job.timeout().as_secs()
                    ))),
                }
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let recorded = match &result {
            Ok(()) => store.complete(&job.id).await.map(|_| JobOutcome::Completed),
            Err(e) => store.fail(&job, &e.to_string(), e.is_retryable()).await.map(JobOutcome::from),
        };

        match (&result, recorded) {
            (Ok(()), Ok(outcome)) => {
                tracing::debug!(elapsed_ms, "Job completed");
                outcome
            }
            (Err(e), Ok(outcome @ JobOutcome::Retrying { not_before })) => {
                tracing::warn!(error = %e, elapsed_ms, not_before, "Job failed, retry scheduled");
                outcome
            }
            (Err(e), Ok(outcome)) => {
                tracing::error!(error = %e, elapsed_ms, "Job dead-lettered");
                outcome
            }
            (_, Err(e)) => {
                // the lease expires and the job is recovered as stale
                tracing::error!(error = %e, "Failed to record job outcome");
                JobOutcome::Retrying { not_before: now_millis() }
            }
        }
    }
    .instrument(span)
    .await
}
