//! Promotion Repository

use super::{RepoResult, bad_enum, parse_decimal, parse_opt_decimal};
use shared::models::{DiscountRule, Promotion};
use sqlx::{SqliteConnection, SqlitePool};

#[derive(sqlx::FromRow)]
struct PromotionRow {
    id: String,
    code: String,
    discount_type: String,
    discount_value: String,
    starts_at: i64,
    ends_at: i64,
    usage_limit: Option<i64>,
    usage_count: i64,
    per_user_limit: Option<i64>,
    min_order_amount: Option<String>,
    max_discount: Option<String>,
    active: bool,
}

impl PromotionRow {
    fn into_model(self) -> RepoResult<Promotion> {
        let value = parse_decimal(&self.discount_value, "promotions.discount_value")?;
        let rule = DiscountRule::from_db(&self.discount_type, value)
            .ok_or_else(|| bad_enum("promotions.discount_type", &self.discount_type))?;
        Ok(Promotion {
            rule,
            min_order_amount: parse_opt_decimal(self.min_order_amount.as_deref(), "promotions.min_order_amount")?,
            max_discount: parse_opt_decimal(self.max_discount.as_deref(), "promotions.max_discount")?,
            id: self.id,
            code: self.code,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            usage_limit: self.usage_limit,
            usage_count: self.usage_count,
            per_user_limit: self.per_user_limit,
            active: self.active,
        })
    }
}

const COLUMNS: &str = "id, code, discount_type, discount_value, starts_at, ends_at, usage_limit, \
                       usage_count, per_user_limit, min_order_amount, max_discount, active";

pub async fn find_by_id(conn: &mut SqliteConnection, id: &str) -> RepoResult<Option<Promotion>> {
    let row = sqlx::query_as::<_, PromotionRow>(&format!("SELECT {COLUMNS} FROM promotions WHERE id = ?"))
        .bind(id)
        .fetch_optional(conn)
        .await?;
    row.map(PromotionRow::into_model).transpose()
}

pub async fn find_by_code(pool: &SqlitePool, code: &str) -> RepoResult<Option<Promotion>> {
    let row =
        sqlx::query_as::<_, PromotionRow>(&format!("SELECT {COLUMNS} FROM promotions WHERE code = ?"))
            .bind(code)
            .fetch_optional(pool)
            .await?;
    row.map(PromotionRow::into_model).transpose()
}

/// How many orders this user already placed with the promotion
pub async fn user_usage_count(
    conn: &mut SqliteConnection,
    promotion_id: &str,
    user_id: &str,
) -> RepoResult<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM promotion_usages WHERE promotion_id = ? AND user_id = ?",
    )
    .bind(promotion_id)
    .bind(user_id)
    .fetch_one(conn)
    .await?;
    Ok(count)
}

/// Consume one redemption. Returns false when the global cap was reached
/// concurrently.
pub async fn consume(
    conn: &mut SqliteConnection,
    promotion_id: &str,
    user_id: &str,
    order_id: &str,
    now: i64,
) -> RepoResult<bool> {
    let rows = sqlx::query(
        "UPDATE promotions SET usage_count = usage_count + 1
         WHERE id = ? AND (usage_limit IS NULL OR usage_count < usage_limit)",
    )
    .bind(promotion_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if rows == 0 {
        return Ok(false);
    }

    sqlx::query(
        "INSERT INTO promotion_usages (promotion_id, user_id, order_id, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(promotion_id)
    .bind(user_id)
    .bind(order_id)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(true)
}

/// Insert a promotion (promotion CRUD lives elsewhere; used by seeding and tests)
pub async fn insert(pool: &SqlitePool, p: &Promotion) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO promotions (id, code, discount_type, discount_value, starts_at, ends_at, usage_limit,
                                 usage_count, per_user_limit, min_order_amount, max_discount, active)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&p.id)
    .bind(&p.code)
    .bind(p.rule.db_kind())
    .bind(p.rule.db_value().to_string())
    .bind(p.starts_at)
    .bind(p.ends_at)
    .bind(p.usage_limit)
    .bind(p.usage_count)
    .bind(p.per_user_limit)
    .bind(p.min_order_amount.map(|d| d.to_string()))
    .bind(p.max_discount.map(|d| d.to_string()))
    .bind(p.active)
    .execute(pool)
    .await?;
    Ok(())
}
