use super::HandlerDeps;
use crate::context::RequestContext;
use crate::jobs::{BookPayload, Job, task_types};
use crate::keyspace::{STOCK_CACHE_TTL, book_stock_key};
use crate::worker::{HandlerResult, TaskHandler};
use async_trait::async_trait;

/// `inventory:sync_book_stock`: refresh the cached availability of one book
pub struct SyncBookStock(pub HandlerDeps);

#[async_trait]
impl TaskHandler for SyncBookStock {
    fn task_type(&self) -> &'static str {
        task_types::SYNC_BOOK_STOCK
    }

    async fn handle(&self, job: &Job, _ctx: &RequestContext) -> HandlerResult {
        let payload: BookPayload = job.decode()?;
        let availability = self.0.engine.check_availability(&payload.book_id, 0).await?;
        self.0
            .cache
            .set(&book_stock_key(&payload.book_id), &availability, STOCK_CACHE_TTL)
            .await;
        tracing::debug!(
            book_id = %payload.book_id,
            available = availability.total_available,
            "Book stock cache refreshed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::test_support::*;
    use serde_json::json;
    use shared::models::Availability;
    use std::sync::Arc;

    #[tokio::test]
    async fn snapshot_reflects_current_stock() {
        let db = memory_db().await;
        seed_book(&db.pool, "b1", "10.00").await;
        seed_warehouse(&db.pool, "w1", None).await;
        seed_warehouse(&db.pool, "w2", None).await;
        seed_stock(&db.pool, "w1", "b1", 4).await;
        seed_stock(&db.pool, "w2", "b1", 3).await;
        let deps = deps(&db, Arc::default());

        let job = job(task_types::SYNC_BOOK_STOCK, json!({"book_id": "b1"}));
        SyncBookStock(deps.clone()).handle(&job, &ctx()).await.unwrap();

        let cached: Availability = deps.cache.get(&book_stock_key("b1")).await.unwrap();
        assert_eq!(cached.total_available, 7);
        assert_eq!(cached.warehouses.len(), 2);

        seed_stock(&db.pool, "w2", "b1", 0).await;
        SyncBookStock(deps.clone()).handle(&job, &ctx()).await.unwrap();
        let cached: Availability = deps.cache.get(&book_stock_key("b1")).await.unwrap();
        assert_eq!(cached.total_available, 4);
    }
}
