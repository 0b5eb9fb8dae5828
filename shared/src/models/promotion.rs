//! Promotion Model

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// How a promotion reduces the order total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DiscountRule {
    /// Percentage of the subtotal (e.g. `10` = 10%)
    Percentage(Decimal),
    /// Fixed amount off the subtotal
    Fixed(Decimal),
    /// Shipping fee waived
    FreeShipping,
}

impl DiscountRule {
    /// Parse from the `(discount_type, discount_value)` column pair
    pub fn from_db(kind: &str, value: Decimal) -> Option<Self> {
        match kind {
            "percentage" => Some(Self::Percentage(value)),
            "fixed" => Some(Self::Fixed(value)),
            "free_shipping" => Some(Self::FreeShipping),
            _ => None,
        }
    }

    pub fn db_kind(&self) -> &'static str {
        match self {
            Self::Percentage(_) => "percentage",
            Self::Fixed(_) => "fixed",
            Self::FreeShipping => "free_shipping",
        }
    }

    pub fn db_value(&self) -> Decimal {
        match self {
            Self::Percentage(v) | Self::Fixed(v) => *v,
            Self::FreeShipping => Decimal::ZERO,
        }
    }
}

/// Promotion entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Promotion {
    pub id: String,
    pub code: String,
    pub rule: DiscountRule,
    pub starts_at: i64,
    pub ends_at: i64,
    /// Global cap on redemptions (`None` = unlimited)
    pub usage_limit: Option<i64>,
    pub usage_count: i64,
    /// Cap per user (`None` = unlimited)
    pub per_user_limit: Option<i64>,
    pub min_order_amount: Option<Decimal>,
    /// Upper bound for percentage discounts
    pub max_discount: Option<Decimal>,
    pub active: bool,
}

/// Why a promotion cannot be applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PromotionRejection {
    Inactive,
    NotStarted,
    Expired,
    UsageLimitReached,
    PerUserLimitReached,
    BelowMinimumOrder { minimum: Decimal },
}

impl PromotionRejection {
    pub fn message(&self) -> String {
        match self {
            Self::Inactive => "promotion is no longer active".to_string(),
            Self::NotStarted => "promotion has not started yet".to_string(),
            Self::Expired => "promotion has expired".to_string(),
            Self::UsageLimitReached => "promotion usage limit reached".to_string(),
            Self::PerUserLimitReached => "promotion already used the maximum number of times".to_string(),
            Self::BelowMinimumOrder { minimum } => {
                format!("order subtotal is below the promotion minimum of {minimum}")
            }
        }
    }
}

impl Promotion {
    /// Checks that do not depend on the order (used by the expiry sweep)
    pub fn check_standing(&self, now: i64) -> Result<(), PromotionRejection> {
        if !self.active {
            return Err(PromotionRejection::Inactive);
        }
        if now < self.starts_at {
            return Err(PromotionRejection::NotStarted);
        }
        if now >= self.ends_at {
            return Err(PromotionRejection::Expired);
        }
        if let Some(limit) = self.usage_limit
            && self.usage_count >= limit
        {
            return Err(PromotionRejection::UsageLimitReached);
        }
        Ok(())
    }

    /// Full eligibility check for one checkout
    pub fn check(
        &self,
        now: i64,
        subtotal: Decimal,
        user_usage: i64,
    ) -> Result<(), PromotionRejection> {
        self.check_standing(now)?;
        if let Some(limit) = self.per_user_limit
            && user_usage >= limit
        {
            return Err(PromotionRejection::PerUserLimitReached);
        }
        if let Some(minimum) = self.min_order_amount
            && subtotal < minimum
        {
            return Err(PromotionRejection::BelowMinimumOrder { minimum });
        }
        Ok(())
    }

    /// Discount on the item subtotal, never more than the subtotal itself.
    ///
    /// Percentages round to 2 dp, half away from zero.
    pub fn discount_for(&self, subtotal: Decimal) -> Decimal {
        let raw = match self.rule {
            DiscountRule::Percentage(pct) => {
                let d = (subtotal * pct / Decimal::ONE_HUNDRED)
                    .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
                match self.max_discount {
                    Some(cap) => d.min(cap),
                    None => d,
                }
            }
            DiscountRule::Fixed(amount) => amount,
            DiscountRule::FreeShipping => Decimal::ZERO,
        };
        raw.max(Decimal::ZERO).min(subtotal.max(Decimal::ZERO))
    }

    pub fn waives_shipping(&self) -> bool {
        matches!(self.rule, DiscountRule::FreeShipping)
    }
}
