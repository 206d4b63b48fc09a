//! # Shared Types
//!
//! Types used across multiple domains: actors and roles for authorization,
//! the product catalog view the engine consumes, and tax rates.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Shared Types                                    │
//! │                                                                         │
//! │  Actor / Role   - who is performing an operation                        │
//! │  Product        - catalog row: pricing source for order snapshots       │
//! │  TaxRate        - basis-point tax rate with validation                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Actor and Role
// =============================================================================

/// Role attached to an authenticated actor.
///
/// Authorization in this crate is deliberately coarse: owner-or-admin for
/// customer-facing reads, admin for state transitions, courier for delivery
/// progress updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum Role {
    Customer,
    Courier,
    Admin,
}

impl Role {
    #[inline]
    pub const fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    #[inline]
    pub const fn is_courier(&self) -> bool {
        matches!(self, Role::Courier)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Customer => write!(f, "customer"),
            Role::Courier => write!(f, "courier"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

/// The identity performing an operation.
///
/// Every mutating operation takes an `&Actor` so ownership checks live in one
/// place instead of being scattered through callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Actor {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn customer(user_id: impl Into<String>) -> Self {
        Actor::new(user_id, Role::Customer)
    }

    pub fn courier(user_id: impl Into<String>) -> Self {
        Actor::new(user_id, Role::Courier)
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Actor::new(user_id, Role::Admin)
    }

    /// True when this actor owns the resource or is an admin.
    pub fn owns_or_admin(&self, owner_id: &str) -> bool {
        self.role.is_admin() || self.user_id == owner_id
    }

    /// Owner-or-admin guard. Returns Unauthorized with the action name on
    /// failure so the caller can bubble it straight up.
    pub fn require_owner_or_admin(&self, owner_id: &str, action: &str) -> CoreResult<()> {
        if self.owns_or_admin(owner_id) {
            Ok(())
        } else {
            Err(CoreError::unauthorized(action))
        }
    }

    /// Admin-only guard.
    pub fn require_admin(&self, action: &str) -> CoreResult<()> {
        if self.role.is_admin() {
            Ok(())
        } else {
            Err(CoreError::unauthorized(action))
        }
    }
}

// =============================================================================
// Product
// =============================================================================

/// Catalog product row.
///
/// The catalog itself is managed elsewhere; this crate only reads products
/// for pricing snapshots and coupon applicability. Prices are integer cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    pub id: String,
    pub name: String,
    pub category: String,
    pub price_cents: i64,
    /// Sale price. When positive it wins over `price_cents` for snapshots.
    pub discount_price_cents: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Price captured onto order items.
    ///
    /// A positive discount price wins over the list price; zero or negative
    /// discount prices are treated as "no sale running".
    pub fn effective_price(&self) -> Money {
        if self.discount_price_cents > 0 {
            Money::from_cents(self.discount_price_cents)
        } else {
            Money::from_cents(self.price_cents)
        }
    }
}

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate in basis points (1 bp = 0.01%).
///
/// ## Example
/// ```
/// use meridian_core::TaxRate;
///
/// let rate = TaxRate::from_bps(1500).unwrap(); // 15%
/// assert_eq!(rate.bps(), 1500);
/// assert_eq!(rate.to_string(), "15.00%");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Maximum representable rate: 100%.
    pub const MAX_BPS: u32 = 10_000;

    /// Creates a TaxRate, rejecting rates above 100%.
    pub fn from_bps(bps: u32) -> CoreResult<Self> {
        if bps > Self::MAX_BPS {
            return Err(ValidationError::OutOfRange {
                field: "tax_rate_bps".to_string(),
                min: 0,
                max: Self::MAX_BPS as i64,
            }
            .into());
        }
        Ok(TaxRate(bps))
    }

    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Tax amount for the given base.
    pub fn tax_on(&self, base: Money) -> Money {
        base.calculate_tax(self.0)
    }
}

impl fmt::Display for TaxRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
