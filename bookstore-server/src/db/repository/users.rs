//! User Repository
//!
//! Account management lives elsewhere; the core only needs the email for
//! notifications and the token-expiry sweep.

use super::RepoResult;
use sqlx::SqlitePool;

/// Verification tokens expire after 24 hours
pub const VERIFICATION_TOKEN_TTL_MS: i64 = 24 * 60 * 60 * 1000;
/// Password reset tokens expire after 1 hour
pub const RESET_TOKEN_TTL_MS: i64 = 60 * 60 * 1000;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub email_verified: bool,
    pub verification_token: Option<String>,
    pub verification_token_sent_at: Option<i64>,
    pub reset_token: Option<String>,
    pub reset_token_sent_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Rows touched by [`cleanup_expired_tokens`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCleanup {
    pub verification: u64,
    pub reset: u64,
}

pub async fn find_by_id(pool: &SqlitePool, id: &str) -> RepoResult<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn insert(pool: &SqlitePool, id: &str, email: &str, name: &str, role: &str) -> RepoResult<()> {
    let now = shared::util::now_millis();
    sqlx::query(
        "INSERT INTO users (id, email, name, role, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
    )
    .bind(id)
    .bind(email)
    .bind(name)
    .bind(role)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Store a fresh verification token unless the user is already verified
pub async fn set_verification_token(
    pool: &SqlitePool,
    user_id: &str,
    token: &str,
    now: i64,
) -> RepoResult<bool> {
    let rows = sqlx::query(
        "UPDATE users SET verification_token = ?1, verification_token_sent_at = ?2, updated_at = ?2
         WHERE id = ?3 AND email_verified = 0",
    )
    .bind(token)
    .bind(now)
    .bind(user_id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows > 0)
}

pub async fn set_reset_token(pool: &SqlitePool, user_id: &str, token: &str, now: i64) -> RepoResult<()> {
    sqlx::query(
        "UPDATE users SET reset_token = ?1, reset_token_sent_at = ?2, updated_at = ?2 WHERE id = ?3",
    )
    .bind(token)
    .bind(now)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Null out expired tokens.
///
/// Verification tokens are cleared only for accounts that are still
/// unverified; reset tokens whenever they are older than their expiry.
pub async fn cleanup_expired_tokens(pool: &SqlitePool, now: i64) -> RepoResult<TokenCleanup> {
    let verification = sqlx::query(
        "UPDATE users SET verification_token = NULL, verification_token_sent_at = NULL, updated_at = ?1
         WHERE verification_token IS NOT NULL
           AND email_verified = 0
           AND verification_token_sent_at < ?2",
    )
    .bind(now)
    .bind(now - VERIFICATION_TOKEN_TTL_MS)
    .execute(pool)
    .await?
    .rows_affected();

    let reset = sqlx::query(
        "UPDATE users SET reset_token = NULL, reset_token_sent_at = NULL, updated_at = ?1
         WHERE reset_token IS NOT NULL
           AND reset_token_sent_at < ?2",
    )
    .bind(now)
    .bind(now - RESET_TOKEN_TTL_MS)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(TokenCleanup { verification, reset })
}
