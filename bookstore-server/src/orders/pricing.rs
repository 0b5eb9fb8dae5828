//! Checkout pricing
//!
//! Pure functions: no I/O, deterministic for a given cart and catalogue.

use rust_decimal::Decimal;
use shared::models::{Book, CartItem, PriceChangedLine, Promotion};
use std::collections::HashMap;

/// Order totals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping_fee: Decimal,
    pub total: Decimal,
}

/// Lines whose snapshot drifted more than `tolerance` from the current
/// price, plus lines whose book disappeared or was deactivated.
pub fn price_changes(
    items: &[CartItem],
    books: &HashMap<&str, &Book>,
    tolerance: Decimal,
) -> Vec<PriceChangedLine> {
    items
        .iter()
        .filter_map(|item| match books.get(item.book_id.as_str()) {
            None => Some(PriceChangedLine {
                book_id: item.book_id.clone(),
                snapshot_price: item.unit_price_snapshot,
                current_price: None,
                active: false,
            }),
            Some(book) if !book.active || (book.price - item.unit_price_snapshot).abs() > tolerance => {
                Some(PriceChangedLine {
                    book_id: item.book_id.clone(),
                    snapshot_price: item.unit_price_snapshot,
                    current_price: Some(book.price),
                    active: book.active,
                })
            }
            Some(_) => None,
        })
        .collect()
}

/// Subtotal at current catalogue prices
pub fn subtotal(items: &[CartItem], books: &HashMap<&str, &Book>) -> Decimal {
    items
        .iter()
        .filter_map(|item| {
            books
                .get(item.book_id.as_str())
                .map(|b| b.price * Decimal::from(item.quantity))
        })
        .sum()
}

/// `total = max(0, subtotal − discount) + shipping_fee`
pub fn quote(subtotal: Decimal, promotion: Option<&Promotion>, flat_fee: Decimal) -> Quote {
    let discount = promotion.map_or(Decimal::ZERO, |p| p.discount_for(subtotal));
    let shipping_fee = match promotion {
        Some(p) if p.waives_shipping() => Decimal::ZERO,
        _ => flat_fee,
    };
    Quote {
        subtotal,
        discount,
        shipping_fee,
        total: (subtotal - discount).max(Decimal::ZERO) + shipping_fee,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::dec;
    use shared::models::DiscountRule;

    fn book(id: &str, price: &str, active: bool) -> Book {
        Book {
            id: id.into(),
            title: id.into(),
            price: dec(price),
            active,
            updated_at: 0,
        }
    }

    fn item(book_id: &str, qty: i64, snapshot: &str) -> CartItem {
        CartItem {
            cart_id: "c1".into(),
            book_id: book_id.into(),
            quantity: qty,
            unit_price_snapshot: dec(snapshot),
        }
    }

    fn promo(rule: DiscountRule) -> Promotion {
        Promotion {
            id: "p1".into(),
            code: "P1".into(),
            rule,
            starts_at: 0,
            ends_at: i64::MAX,
            usage_limit: None,
            usage_count: 0,
            per_user_limit: None,
            min_order_amount: None,
            max_discount: None,
            active: true,
        }
    }

    #[test]
    fn drift_within_tolerance_is_accepted() {
        let books = [book("b1", "10.00", true), book("b2", "20.00", true)];
        let map: HashMap<_, _> = books.iter().map(|b| (b.id.as_str(), b)).collect();
        let items = [item("b1", 1, "10.01"), item("b2", 1, "19.50")];

        let changed = price_changes(&items, &map, dec("0.01"));
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].book_id, "b2");
        assert_eq!(changed[0].current_price, Some(dec("20.00")));
        assert!(changed[0].active);
    }

    #[test]
    fn inactive_and_missing_books_are_reported() {
        let books = [book("b1", "10.00", false)];
        let map: HashMap<_, _> = books.iter().map(|b| (b.id.as_str(), b)).collect();
        let items = [item("b1", 1, "10.00"), item("gone", 1, "5.00")];

        let changed = price_changes(&items, &map, dec("0.01"));
        assert_eq!(changed.len(), 2);
        assert!(!changed[0].active);
        assert_eq!(changed[1].current_price, None);
    }

    #[test]
    fn subtotal_uses_current_prices() {
        let books = [book("b1", "10.00", true), book("b2", "2.50", true)];
        let map: HashMap<_, _> = books.iter().map(|b| (b.id.as_str(), b)).collect();
        let items = [item("b1", 2, "9.00"), item("b2", 3, "2.50")];
        assert_eq!(subtotal(&items, &map), dec("27.50"));
    }

    #[test]
    fn percentage_discount_rounds_half_away_from_zero() {
        let q = quote(dec("10.05"), Some(&promo(DiscountRule::Percentage(dec("10")))), dec("3"));
        assert_eq!(q.discount, dec("1.01"));
        assert_eq!(q.total, dec("12.04"));
    }

    #[test]
    fn fixed_discount_never_goes_negative() {
        let q = quote(dec("15.00"), Some(&promo(DiscountRule::Fixed(dec("50")))), dec("2.00"));
        assert_eq!(q.discount, dec("15.00"));
        assert_eq!(q.total, dec("2.00"));
    }

    #[test]
    fn free_shipping_waives_the_fee() {
        let q = quote(dec("40.00"), Some(&promo(DiscountRule::FreeShipping)), dec("5.00"));
        assert_eq!(q.discount, Decimal::ZERO);
        assert_eq!(q.shipping_fee, Decimal::ZERO);
        assert_eq!(q.total, dec("40.00"));
    }

    #[test]
    fn no_promotion_adds_flat_fee() {
        let q = quote(dec("40.00"), None, dec("5.00"));
        assert_eq!(q.total, dec("45.00"));
    }
}
