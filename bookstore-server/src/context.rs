//! Request-scoped context
//!
//! Carries the request id, caller identity and the deadline through every
//! call. Each suspension point is bounded by `min(op_timeout, remaining)`.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// The deadline was exceeded before the operation completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline exceeded")]
pub struct DeadlineExceeded;

impl From<DeadlineExceeded> for shared::AppError {
    fn from(_: DeadlineExceeded) -> Self {
        shared::AppError::timeout()
    }
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub user_id: Option<String>,
    pub client_ip: Option<String>,
    pub deadline: Instant,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, budget: Duration) -> Self {
        Self {
            request_id: request_id.into(),
            user_id: None,
            client_ip: None,
            deadline: Instant::now() + budget,
        }
    }

    /// Context for a worker task; the deadline is the task timeout
    pub fn background(task_id: impl Into<String>, timeout: Duration) -> Self {
        Self::new(task_id, timeout)
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_client_ip(mut self, ip: Option<String>) -> Self {
        self.client_ip = ip;
        self
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Run `fut` bounded by `min(op_timeout, remaining)`.
    ///
    /// On expiry the future is dropped, which rolls back any transaction it
    /// holds.
    pub async fn run<F, T>(&self, op_timeout: Duration, fut: F) -> Result<T, DeadlineExceeded>
    where
        F: Future<Output = T>,
    {
        let budget = op_timeout.min(self.remaining());
        if budget.is_zero() {
            return Err(DeadlineExceeded);
        }
        tokio::time::timeout(budget, fut)
            .await
            .map_err(|_| DeadlineExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_completes_within_budget() {
        let ctx = RequestContext::new("req-1", Duration::from_secs(5));
        let v = ctx.run(Duration::from_secs(1), async { 42 }).await;
        assert_eq!(v, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn op_timeout_bounds_the_call() {
        let ctx = RequestContext::new("req-2", Duration::from_secs(30));
        let r = ctx
            .run(Duration::from_millis(100), tokio::time::sleep(Duration::from_secs(1)))
            .await;
        assert_eq!(r, Err(DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn request_deadline_bounds_the_call() {
        let ctx = RequestContext::new("req-3", Duration::from_millis(50));
        let r = ctx
            .run(Duration::from_secs(5), tokio::time::sleep(Duration::from_secs(1)))
            .await;
        assert_eq!(r, Err(DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_context_fails_fast() {
        let ctx = RequestContext::new("req-4", Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(ctx.is_expired());
        assert_eq!(ctx.run(Duration::from_secs(1), async {}).await, Err(DeadlineExceeded));
    }
}
