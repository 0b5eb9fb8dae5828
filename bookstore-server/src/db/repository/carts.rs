//! Cart Repository

use super::{RepoError, RepoResult, bad_enum, parse_decimal};
use rust_decimal::Decimal;
use shared::models::{Cart, CartItem, CartStatus};
use sqlx::{SqliteConnection, SqlitePool};

#[derive(sqlx::FromRow)]
struct CartRow {
    id: String,
    user_id: Option<String>,
    session_id: Option<String>,
    status: String,
    applied_promotion_id: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl CartRow {
    fn into_model(self, items: Vec<CartItem>) -> RepoResult<Cart> {
        let status =
            CartStatus::from_db(&self.status).ok_or_else(|| bad_enum("carts.status", &self.status))?;
        Ok(Cart {
            id: self.id,
            user_id: self.user_id,
            session_id: self.session_id,
            status,
            applied_promotion_id: self.applied_promotion_id,
            items,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CartItemRow {
    cart_id: String,
    book_id: String,
    quantity: i64,
    unit_price_snapshot: String,
}

impl CartItemRow {
    fn into_model(self) -> RepoResult<CartItem> {
        Ok(CartItem {
            unit_price_snapshot: parse_decimal(&self.unit_price_snapshot, "cart_items.unit_price_snapshot")?,
            cart_id: self.cart_id,
            book_id: self.book_id,
            quantity: self.quantity,
        })
    }
}

/// Cart with an applied promotion, as seen by the expiry sweep
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PromotedCart {
    pub id: String,
    pub user_id: Option<String>,
    pub applied_promotion_id: String,
}

const CART_COLUMNS: &str =
    "id, user_id, session_id, status, applied_promotion_id, created_at, updated_at";

async fn load_items(conn: &mut SqliteConnection, cart_id: &str) -> RepoResult<Vec<CartItem>> {
    let rows = sqlx::query_as::<_, CartItemRow>(
        "SELECT cart_id, book_id, quantity, unit_price_snapshot FROM cart_items
         WHERE cart_id = ? ORDER BY added_at, book_id",
    )
    .bind(cart_id)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(CartItemRow::into_model).collect()
}

pub async fn find_by_id(conn: &mut SqliteConnection, id: &str) -> RepoResult<Option<Cart>> {
    let row = sqlx::query_as::<_, CartRow>(&format!("SELECT {CART_COLUMNS} FROM carts WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(row) => {
            let items = load_items(conn, &row.id).await?;
            Ok(Some(row.into_model(items)?))
        }
        None => Ok(None),
    }
}

pub async fn find_active_for_user(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> RepoResult<Option<Cart>> {
    let row = sqlx::query_as::<_, CartRow>(&format!(
        "SELECT {CART_COLUMNS} FROM carts WHERE user_id = ? AND status = 'active'"
    ))
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;
    match row {
        Some(row) => {
            let items = load_items(conn, &row.id).await?;
            Ok(Some(row.into_model(items)?))
        }
        None => Ok(None),
    }
}

/// The user's active cart, created on first use
pub async fn get_or_create_active(pool: &SqlitePool, user_id: &str) -> RepoResult<Cart> {
    let now = shared::util::now_millis();
    sqlx::query(
        "INSERT INTO carts (id, user_id, status, created_at, updated_at)
         VALUES (?1, ?2, 'active', ?3, ?3)
         ON CONFLICT DO NOTHING",
    )
    .bind(shared::util::new_id())
    .bind(user_id)
    .bind(now)
    .execute(pool)
    .await?;

    let mut conn = pool.acquire().await?;
    find_active_for_user(&mut conn, user_id)
        .await?
        .ok_or_else(|| RepoError::Database("Failed to create cart".into()))
}

/// Add or replace a line with the given price snapshot
pub async fn upsert_item(
    pool: &SqlitePool,
    cart_id: &str,
    book_id: &str,
    quantity: i64,
    unit_price: Decimal,
) -> RepoResult<()> {
    let now = shared::util::now_millis();
    sqlx::query(
        "INSERT INTO cart_items (cart_id, book_id, quantity, unit_price_snapshot, added_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (cart_id, book_id) DO UPDATE SET quantity = ?3, unit_price_snapshot = ?4",
    )
    .bind(cart_id)
    .bind(book_id)
    .bind(quantity)
    .bind(unit_price.to_string())
    .bind(now)
    .execute(pool)
    .await?;
    touch(pool, cart_id, now).await
}

async fn touch(pool: &SqlitePool, cart_id: &str, now: i64) -> RepoResult<()> {
    sqlx::query("UPDATE carts SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(cart_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Set or clear the applied promotion
pub async fn set_promotion(
    conn: &mut SqliteConnection,
    cart_id: &str,
    promotion_id: Option<&str>,
    now: i64,
) -> RepoResult<()> {
    sqlx::query("UPDATE carts SET applied_promotion_id = ?, updated_at = ? WHERE id = ?")
        .bind(promotion_id)
        .bind(now)
        .bind(cart_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Clear the promotion only if it is still the given one (sweep-safe)
pub async fn remove_promotion_if(
    pool: &SqlitePool,
    cart_id: &str,
    promotion_id: &str,
    now: i64,
) -> RepoResult<bool> {
    let rows = sqlx::query(
        "UPDATE carts SET applied_promotion_id = NULL, updated_at = ?
         WHERE id = ? AND applied_promotion_id = ? AND status = 'active'",
    )
    .bind(now)
    .bind(cart_id)
    .bind(promotion_id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows > 0)
}

/// Overwrite line price snapshots with fresh prices
pub async fn refresh_snapshots(
    conn: &mut SqliteConnection,
    cart_id: &str,
    prices: &[(String, Decimal)],
) -> RepoResult<()> {
    for (book_id, price) in prices {
        sqlx::query("UPDATE cart_items SET unit_price_snapshot = ? WHERE cart_id = ? AND book_id = ?")
            .bind(price.to_string())
            .bind(cart_id)
            .bind(book_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// `active → converted` and clear the lines. Returns false if the cart was
/// no longer active.
pub async fn mark_converted(conn: &mut SqliteConnection, cart_id: &str, now: i64) -> RepoResult<bool> {
    let rows = sqlx::query(
        "UPDATE carts SET status = 'converted', updated_at = ? WHERE id = ? AND status = 'active'",
    )
    .bind(now)
    .bind(cart_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if rows == 0 {
        return Ok(false);
    }
    sqlx::query("DELETE FROM cart_items WHERE cart_id = ?")
        .bind(cart_id)
        .execute(conn)
        .await?;
    Ok(true)
}

/// Active carts with a promotion, keyset-paginated by id
pub async fn with_promotion_after(
    pool: &SqlitePool,
    after_id: &str,
    limit: i64,
) -> RepoResult<Vec<PromotedCart>> {
    let rows = sqlx::query_as::<_, PromotedCart>(
        "SELECT id, user_id, applied_promotion_id FROM carts
         WHERE status = 'active' AND applied_promotion_id IS NOT NULL AND id > ?
         ORDER BY id LIMIT ?",
    )
    .bind(after_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
