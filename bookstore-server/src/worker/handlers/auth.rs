use super::HandlerDeps;
use crate::context::RequestContext;
use crate::db::repository::users;
use crate::jobs::{Job, UserPayload, task_types};
use crate::notify::templates;
use crate::worker::{HandlerResult, TaskHandler};
use async_trait::async_trait;
use serde_json::json;
use shared::util::now_millis;

/// 6-digit verification code
fn verification_code() -> String {
    use rand::Rng;
    let code: u32 = rand::thread_rng().gen_range(100_000..1_000_000);
    code.to_string()
}

/// `email:verification`
pub struct SendEmailVerification(pub HandlerDeps);

#[async_trait]
impl TaskHandler for SendEmailVerification {
    fn task_type(&self) -> &'static str {
        task_types::EMAIL_VERIFICATION
    }

    async fn handle(&self, job: &Job, _ctx: &RequestContext) -> HandlerResult {
        let deps = &self.0;
        let payload: UserPayload = job.decode()?;
        let Some(user) = users::find_by_id(&deps.pool, &payload.user_id).await? else {
            tracing::warn!(user_id = %payload.user_id, "User not found, skipping verification email");
            return Ok(());
        };
        if user.email_verified {
            tracing::debug!(user_id = %user.id, "Email already verified");
            return Ok(());
        }

        let token = verification_code();
        if !users::set_verification_token(&deps.pool, &user.id, &token, now_millis()).await? {
            // verified between the read and the write
            return Ok(());
        }

        let email = templates::render(templates::EMAIL_VERIFICATION, &json!({"name": user.name, "token": token}))?;
        let message_id = deps.send_email(&user.email, &email).await?;
        tracing::info!(user_id = %user.id, message_id, "Verification email sent");
        Ok(())
    }
}

/// `auth:cleanup_expired_tokens`
pub struct CleanupExpiredTokens(pub HandlerDeps);

#[async_trait]
impl TaskHandler for CleanupExpiredTokens {
    fn task_type(&self) -> &'static str {
        task_types::CLEANUP_EXPIRED_TOKENS
    }

    async fn handle(&self, _job: &Job, _ctx: &RequestContext) -> HandlerResult {
        let cleared = users::cleanup_expired_tokens(&self.0.pool, now_millis()).await?;
        if cleared.verification > 0 || cleared.reset > 0 {
            tracing::info!(
                verification = cleared.verification,
                reset = cleared.reset,
                "Expired tokens cleared"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::test_support::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn unverified_user_gets_a_fresh_code() {
        let db = memory_db().await;
        seed_user(&db.pool, "u1").await;
        let sender = Arc::new(RecordingSender::default());

        let job = job(task_types::EMAIL_VERIFICATION, json!({"user_id": "u1"}));
        SendEmailVerification(deps(&db, sender.clone()))
            .handle(&job, &ctx())
            .await
            .unwrap();

        assert_eq!(sender.subjects(), vec!["Verify your email address"]);
        let user = users::find_by_id(&db.pool, "u1").await.unwrap().unwrap();
        let token = user.verification_token.unwrap();
        assert_eq!(token.len(), 6);
        assert!(token.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn verified_user_is_skipped() {
        let db = memory_db().await;
        seed_user(&db.pool, "u1").await;
        sqlx::query("UPDATE users SET email_verified = 1 WHERE id = 'u1'")
            .execute(&db.pool)
            .await
            .unwrap();
        let sender = Arc::new(RecordingSender::default());

        let job = job(task_types::EMAIL_VERIFICATION, json!({"user_id": "u1"}));
        SendEmailVerification(deps(&db, sender.clone()))
            .handle(&job, &ctx())
            .await
            .unwrap();
        assert!(sender.sent_to().is_empty());
    }

    #[tokio::test]
    async fn stale_tokens_are_cleared() {
        let db = memory_db().await;
        seed_user(&db.pool, "u1").await;
        seed_user(&db.pool, "u2").await;
        let long_ago = now_millis() - users::VERIFICATION_TOKEN_TTL_MS - 1_000;
        users::set_verification_token(&db.pool, "u1", "111111", long_ago).await.unwrap();
        users::set_verification_token(&db.pool, "u2", "222222", now_millis()).await.unwrap();

        let job = job(task_types::CLEANUP_EXPIRED_TOKENS, json!({}));
        CleanupExpiredTokens(deps(&db, Arc::default()))
            .handle(&job, &ctx())
            .await
            .unwrap();

        let u1 = users::find_by_id(&db.pool, "u1").await.unwrap().unwrap();
        let u2 = users::find_by_id(&db.pool, "u2").await.unwrap().unwrap();
        assert!(u1.verification_token.is_none());
        assert_eq!(u2.verification_token.as_deref(), Some("222222"));
    }
}
