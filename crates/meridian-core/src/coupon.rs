//! # Coupon Evaluator
//!
//! Coupon validity, applicability, and discount math.
//!
//! ## Evaluation Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Coupon Evaluation                                   │
//! │                                                                         │
//! │  "SAVE20" + order                                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Gate 1: validity                                                       │
//! │  ├── is_active?                                                         │
//! │  ├── starts_at <= now <= ends_at?                                       │
//! │  └── used_count < usage_limit?                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Gate 2: applicability                                                  │
//! │  ├── order total >= min_order_amount?                                   │
//! │  └── items match product/category restrictions?                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Discount math                                                          │
//! │  ├── percentage: total * value / 100, capped at max_discount_amount     │
//! │  ├── fixed:      value                                                  │
//! │  └── either way: never more than the order total                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `calculate_discount` is a total function that answers "what would this
//! coupon take off" with 0 for any coupon that does not apply. The typed
//! failures (`CouponNotApplicable` with a reason) come from `ensure_valid`
//! and `check_applicability`, used on the apply path where the caller needs
//! to tell the customer why.

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::Product;
use crate::validation::validate_coupon_code;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Discount Type
// =============================================================================

/// How `discount_value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum DiscountType {
    /// `discount_value` is a whole percent in 0..=100.
    Percentage,
    /// `discount_value` is an amount in cents.
    Fixed,
}

impl fmt::Display for DiscountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscountType::Percentage => write!(f, "percentage"),
            DiscountType::Fixed => write!(f, "fixed"),
        }
    }
}

// =============================================================================
// Coupon
// =============================================================================

/// A discount code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub id: String,
    pub code: String,
    pub discount_type: DiscountType,
    /// Whole percent for `Percentage`, cents for `Fixed`.
    pub discount_value: i64,
    /// Orders below this total get no discount.
    pub min_order_amount_cents: i64,
    /// Cap for percentage discounts. Ignored for fixed discounts.
    pub max_discount_amount_cents: Option<i64>,
    /// Total redemptions allowed across all users. None = unlimited.
    pub usage_limit: Option<i64>,
    pub used_count: i64,
    /// Per-user redemption cap. Stored for reporting; not enforced, because
    /// redemptions are not tracked per user yet.
    pub usage_per_user: Option<i64>,
    /// When non-empty, at least one order item must be in one of these
    /// categories.
    pub applicable_categories: Vec<String>,
    /// When non-empty, at least one order item must be one of these products.
    pub applicable_products: Vec<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Coupon {
    // -------------------------------------------------------------------------
    // Validity
    // -------------------------------------------------------------------------

    /// True when the coupon is active, inside its window, and under its
    /// usage limit. Both window endpoints are inclusive.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && now >= self.starts_at
            && now <= self.ends_at
            && !self.has_reached_limit()
    }

    /// True when a usage limit exists and has been consumed.
    pub fn has_reached_limit(&self) -> bool {
        match self.usage_limit {
            Some(limit) => self.used_count >= limit,
            None => false,
        }
    }

    /// Redemptions left, or None for unlimited coupons.
    pub fn remaining_uses(&self) -> Option<i64> {
        self.usage_limit.map(|limit| (limit - self.used_count).max(0))
    }

    /// Validity as a typed error, naming the first failing gate.
    pub fn ensure_valid(&self, now: DateTime<Utc>) -> CoreResult<()> {
        if !self.is_active {
            return Err(CoreError::coupon_not_applicable(&self.code, "coupon is inactive"));
        }
        if now < self.starts_at {
            return Err(CoreError::coupon_not_applicable(
                &self.code,
                "coupon is not active yet",
            ));
        }
        if now > self.ends_at {
            return Err(CoreError::coupon_not_applicable(&self.code, "coupon has expired"));
        }
        if self.has_reached_limit() {
            return Err(CoreError::coupon_not_applicable(
                &self.code,
                "coupon usage limit reached",
            ));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Applicability
    // -------------------------------------------------------------------------

    /// Checks product/category restrictions against the order's products.
    ///
    /// An empty restriction list means "applies to everything". When both
    /// lists are set, each must be satisfied by at least one item.
    pub fn check_applicability(&self, products: &[Product]) -> CoreResult<()> {
        if !self.applicable_products.is_empty() {
            let matched = products
                .iter()
                .any(|p| self.applicable_products.iter().any(|id| id == &p.id));
            if !matched {
                return Err(CoreError::coupon_not_applicable(
                    &self.code,
                    "no order item is an eligible product",
                ));
            }
        }

        if !self.applicable_categories.is_empty() {
            let matched = products
                .iter()
                .any(|p| self.applicable_categories.iter().any(|c| c == &p.category));
            if !matched {
                return Err(CoreError::coupon_not_applicable(
                    &self.code,
                    "no order item is in an eligible category",
                ));
            }
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Discount math
    // -------------------------------------------------------------------------

    /// Discount for an order total. Total function: invalid coupons and
    /// totals below the minimum yield zero.
    ///
    /// ## Example
    /// ```
    /// use chrono::{Duration, Utc};
    /// use meridian_core::{Coupon, DiscountType, Money};
    ///
    /// let now = Utc::now();
    /// let coupon = Coupon {
    ///     id: "c-1".into(),
    ///     code: "SAVE20".into(),
    ///     discount_type: DiscountType::Percentage,
    ///     discount_value: 20,
    ///     min_order_amount_cents: 0,
    ///     max_discount_amount_cents: Some(500),
    ///     usage_limit: None,
    ///     used_count: 0,
    ///     usage_per_user: None,
    ///     applicable_categories: vec![],
    ///     applicable_products: vec![],
    ///     starts_at: now - Duration::days(1),
    ///     ends_at: now + Duration::days(1),
    ///     is_active: true,
    ///     created_at: now,
    ///     updated_at: now,
    /// };
    ///
    /// // 20% of $100.00 is $20.00, capped at $5.00.
    /// assert_eq!(coupon.calculate_discount(Money::from_cents(10_000), now), Money::from_cents(500));
    /// ```
    pub fn calculate_discount(&self, order_amount: Money, now: DateTime<Utc>) -> Money {
        if !self.is_valid(now) {
            return Money::zero();
        }
        if order_amount.cents() < self.min_order_amount_cents {
            return Money::zero();
        }

        let discount = match self.discount_type {
            DiscountType::Percentage => {
                let raw = order_amount.percent_of(self.discount_value);
                match self.max_discount_amount_cents {
                    Some(cap) => raw.min(Money::from_cents(cap)),
                    None => raw,
                }
            }
            DiscountType::Fixed => Money::from_cents(self.discount_value),
        };

        // A discount can never exceed what the customer owes.
        discount.min(order_amount)
    }

    // -------------------------------------------------------------------------
    // Construction-time validation
    // -------------------------------------------------------------------------

    /// Shape checks for coupon creation and edits.
    pub fn validate(&self) -> CoreResult<()> {
        validate_coupon_code(&self.code)?;

        match self.discount_type {
            DiscountType::Percentage => {
                if !(0..=100).contains(&self.discount_value) {
                    return Err(ValidationError::OutOfRange {
                        field: "discount_value".to_string(),
                        min: 0,
                        max: 100,
                    }
                    .into());
                }
            }
            DiscountType::Fixed => {
                if self.discount_value < 0 {
                    return Err(ValidationError::MustBePositive {
                        field: "discount_value".to_string(),
                    }
                    .into());
                }
            }
        }

        if self.min_order_amount_cents < 0 {
            return Err(ValidationError::OutOfRange {
                field: "min_order_amount".to_string(),
                min: 0,
                max: i64::MAX,
            }
            .into());
        }

        if self.ends_at <= self.starts_at {
            return Err(ValidationError::InvalidFormat {
                field: "ends_at".to_string(),
                reason: "must be after starts_at".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

// Coupons carry two JSON-array columns, so FromRow is written by hand.
#[cfg(feature = "sqlx")]
impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for Coupon {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let decode_list = |column: &'static str, raw: String| -> Result<Vec<String>, sqlx::Error> {
            serde_json::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
                index: column.to_string(),
                source: Box::new(e),
            })
        };

        let categories_raw: String = row.try_get("applicable_categories")?;
        let products_raw: String = row.try_get("applicable_products")?;

        Ok(Coupon {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            discount_type: row.try_get("discount_type")?,
            discount_value: row.try_get("discount_value")?,
            min_order_amount_cents: row.try_get("min_order_amount_cents")?,
            max_discount_amount_cents: row.try_get("max_discount_amount_cents")?,
            usage_limit: row.try_get("usage_limit")?,
            used_count: row.try_get("used_count")?,
            usage_per_user: row.try_get("usage_per_user")?,
            applicable_categories: decode_list("applicable_categories", categories_raw)?,
            applicable_products: decode_list("applicable_products", products_raw)?,
            starts_at: row.try_get("starts_at")?,
            ends_at: row.try_get("ends_at")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
