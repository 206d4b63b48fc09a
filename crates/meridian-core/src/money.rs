//! # Money Type
//!
//! Fixed-point money arithmetic for order and payment amounts.
//!
//! ## Why Integer Cents?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Floating point is not safe for money:                                  │
//! │                                                                         │
//! │     0.1 + 0.2 == 0.30000000000000004   (f64)                            │
//! │                                                                         │
//! │  Money stores integer cents instead:                                    │
//! │                                                                         │
//! │     Money(10) + Money(20) == Money(30)   always                         │
//! │                                                                         │
//! │  $12.34 is stored as Money(1234).                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All order totals, payment amounts, and coupon thresholds flow through this
//! type. Conversion to display strings happens only at the edges.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

/// Monetary amount in integer cents.
///
/// ## Example
/// ```
/// use meridian_core::Money;
///
/// let price = Money::from_dollars(12, 34);
/// assert_eq!(price.cents(), 1234);
/// assert_eq!(price.to_string(), "12.34");
///
/// let total = price + Money::from_cents(66);
/// assert_eq!(total, Money::from_cents(1300));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates Money from an integer cent amount.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates Money from whole dollars and a cent part.
    ///
    /// `cents` is clamped into 0..=99 by the caller's contract; values above
    /// 99 simply carry into dollars, which is fine for literals in tests.
    #[inline]
    pub const fn from_dollars(dollars: i64, cents: i64) -> Self {
        Money(dollars * 100 + cents)
    }

    /// Zero amount.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Raw cent amount.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Whole-dollar part (truncated toward zero).
    #[inline]
    pub const fn dollars(&self) -> i64 {
        self.0 / 100
    }

    /// Cent part within the current dollar (0..=99 for non-negative amounts).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Returns the smaller of two amounts.
    #[inline]
    pub fn min(self, other: Self) -> Self {
        Money(self.0.min(other.0))
    }

    /// Tax in cents for a rate given in basis points (1 bp = 0.01%).
    ///
    /// Uses i128 intermediate math so large totals cannot overflow, and
    /// rounds half-up to the nearest cent.
    ///
    /// ## Example
    /// ```
    /// use meridian_core::Money;
    ///
    /// // 15% of $100.00
    /// let tax = Money::from_cents(10000).calculate_tax(1500);
    /// assert_eq!(tax, Money::from_cents(1500));
    /// ```
    pub fn calculate_tax(&self, rate_bps: u32) -> Self {
        let cents = (self.0 as i128 * rate_bps as i128 + 5_000) / 10_000;
        Money(cents as i64)
    }

    /// Percentage of this amount, truncated toward zero.
    ///
    /// Coupon percentage discounts use whole percents, so `percent` is
    /// expected in 0..=100. The result of `amount * percent / 100` is
    /// truncated, never rounded up, so a discount can never exceed the
    /// mathematically exact fraction.
    pub fn percent_of(&self, percent: i64) -> Self {
        let cents = self.0 as i128 * percent as i128 / 100;
        Money(cents as i64)
    }

    /// Line total for a quantity of this unit amount.
    pub fn multiply_quantity(&self, quantity: i64) -> Self {
        Money(self.0 * quantity)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_negative() {
            write!(f, "-{}.{:02}", self.abs().dollars(), self.abs().cents_part())
        } else {
            write!(f, "{}.{:02}", self.dollars(), self.cents_part())
        }
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Mul<i64> for Money {
    type Output = Money;

    fn mul(self, rhs: i64) -> Money {
        Money(self.0 * rhs)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
