use super::HandlerDeps;
use crate::context::RequestContext;
use crate::jobs::{Job, RefundPayload, task_types};
use crate::payments::RefundExecution;
use crate::worker::{HandlerResult, TaskHandler};
use async_trait::async_trait;

/// `payment:execute_refund`
///
/// Gateway outages are retried; on the last attempt the refund is failed
/// and the payment returns to `succeeded`.
pub struct ExecuteRefund(pub HandlerDeps);

#[async_trait]
impl TaskHandler for ExecuteRefund {
    fn task_type(&self) -> &'static str {
        task_types::EXECUTE_REFUND
    }

    async fn handle(&self, job: &Job, _ctx: &RequestContext) -> HandlerResult {
        let payload: RefundPayload = job.decode()?;
        match self.0.payments.execute_refund(&payload.refund_id, job.is_last_attempt()).await? {
            RefundExecution::Succeeded { gateway_ref } => {
                tracing::info!(refund_id = %payload.refund_id, gateway_ref, "Refund executed");
            }
            RefundExecution::Failed { reason } => {
                tracing::warn!(refund_id = %payload.refund_id, reason, "Refund failed");
            }
            RefundExecution::Skipped(status) => {
                tracing::debug!(refund_id = %payload.refund_id, ?status, "Refund not executable");
            }
        }
        Ok(())
    }
}
