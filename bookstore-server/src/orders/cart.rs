use super::{OrderError, OrderResult, OrderService};
use crate::db::repository::{books, carts, promotions};
use shared::models::Cart;
use shared::util::now_millis;

impl OrderService {
    pub async fn get_cart(&self, user_id: &str) -> OrderResult<Cart> {
        Ok(carts::get_or_create_active(&self.pool, user_id).await?)
    }

    /// Add or replace a line at the current catalogue price
    pub async fn add_item(&self, user_id: &str, book_id: &str, quantity: i64) -> OrderResult<Cart> {
        if quantity <= 0 {
            return Err(OrderError::InvalidQuantity {
                book_id: book_id.to_string(),
                quantity,
            });
        }
        let book = books::find_by_id(&self.pool, book_id)
            .await?
            .filter(|b| b.active)
            .ok_or_else(|| OrderError::BookNotFound(book_id.to_string()))?;

        let cart = carts::get_or_create_active(&self.pool, user_id).await?;
        carts::upsert_item(&self.pool, &cart.id, book_id, quantity, book.price).await?;
        self.get_cart(user_id).await
    }

    /// Apply a promotion code, or clear it with `None`. Order-dependent
    /// rules (minimum amount, per-user cap) are checked at checkout.
    pub async fn apply_promotion(&self, user_id: &str, code: Option<&str>) -> OrderResult<Cart> {
        let cart = carts::get_or_create_active(&self.pool, user_id).await?;
        let promotion_id = match code {
            None => None,
            Some(code) => {
                let promo = promotions::find_by_code(&self.pool, code)
                    .await?
                    .ok_or_else(|| OrderError::PromotionNotFound(code.to_string()))?;
                promo
                    .check_standing(now_millis())
                    .map_err(|why| OrderError::PromotionRejected(code.to_string(), why.message()))?;
                Some(promo.id)
            }
        };

        let mut conn = self.pool.acquire().await?;
        carts::set_promotion(&mut conn, &cart.id, promotion_id.as_deref(), now_millis()).await?;
        drop(conn);
        self.get_cart(user_id).await
    }
}
