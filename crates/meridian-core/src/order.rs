//! # Order Lifecycle
//!
//! The order state machine and its price breakdown.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   pending ──► processing ──► shipped ──► delivered                      │
//! │      │             │            │            (terminal)                 │
//! │      │             │            │                                       │
//! │      └─────────────┴────────────┴──────► cancelled                      │
//! │                                          (terminal)                     │
//! │                                                                         │
//! │   is_paid       - set by payment reconciliation, not by status edits    │
//! │   is_delivered  - set by delivery tracking, not by status edits         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two mutation paths exist on purpose. `transition_to` walks the strict
//! chain above and is what administrative status edits use. `mark_shipped`
//! and `mark_delivered` are the delivery-tracking cascade: they set the
//! status directly, because the courier's progress is the ground truth even
//! when the order record lagged behind. Callers log when a cascade lands on
//! an order that already reached a terminal state.

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Order Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Processing => write!(f, "processing"),
            OrderStatus::Shipped => write!(f, "shipped"),
            OrderStatus::Delivered => write!(f, "delivered"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// =============================================================================
// Payment Method
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum PaymentMethod {
    Card,
    Paypal,
    BankTransfer,
    CashOnDelivery,
}

impl PaymentMethod {
    /// True for methods settled through a gateway before fulfilment.
    /// Cash on delivery settles at the door.
    #[inline]
    pub const fn is_prepaid(&self) -> bool {
        !matches!(self, PaymentMethod::CashOnDelivery)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Card => write!(f, "card"),
            PaymentMethod::Paypal => write!(f, "paypal"),
            PaymentMethod::BankTransfer => write!(f, "bank_transfer"),
            PaymentMethod::CashOnDelivery => write!(f, "cash_on_delivery"),
        }
    }
}

// =============================================================================
// Shipping Address
// =============================================================================

/// Destination address, snapshotted onto the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ShippingAddress {
    #[cfg_attr(feature = "sqlx", sqlx(rename = "ship_address"))]
    pub address: String,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "ship_city"))]
    pub city: String,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "ship_postal_code"))]
    pub postal_code: String,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "ship_country"))]
    pub country: String,
}

// =============================================================================
// Order Items
// =============================================================================

/// One line of an order.
///
/// `unit_price_cents` is the price snapshot taken at checkout. The live
/// product price can change afterwards; the order never follows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl OrderItem {
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.unit_price_cents).multiply_quantity(self.quantity)
    }
}

/// Sum of line totals.
pub fn items_total(items: &[OrderItem]) -> Money {
    items.iter().map(OrderItem::line_total).sum()
}

// =============================================================================
// Gateway Receipt
// =============================================================================

/// What the payment gateway reports back on a successful charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayReceipt {
    /// Gateway-side transaction reference.
    pub reference: String,
    pub status: String,
    pub payer_email: Option<String>,
}

// =============================================================================
// Order Totals
// =============================================================================

/// Checkout price breakdown.
///
/// Tax is charged on the undiscounted items total; the discount comes off
/// at the end. The discount is expected to be pre-clamped to the items
/// total by the coupon evaluator, so the final amount cannot go negative,
/// but `compute` floors it at zero anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTotals {
    pub items: Money,
    pub discount: Money,
    pub tax: Money,
    pub shipping: Money,
    pub total: Money,
}

impl OrderTotals {
    pub fn compute(items: Money, discount: Money, tax: Money, shipping: Money) -> Self {
        let total = items + tax + shipping - discount;
        OrderTotals {
            items,
            discount,
            tax,
            shipping,
            total: if total.is_negative() {
                Money::zero()
            } else {
                total
            },
        }
    }
}

// =============================================================================
// Order
// =============================================================================

/// A customer order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<String>,
    pub items_price_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub shipping_cents: i64,
    pub total_cents: i64,
    #[cfg_attr(feature = "sqlx", sqlx(flatten))]
    pub shipping: ShippingAddress,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub gateway_reference: Option<String>,
    pub payer_email: Option<String>,
    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Loaded separately from the order row.
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    pub items: Vec<OrderItem>,
}

impl Order {
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    /// Whether `next` is reachable on the strict chain.
    ///
    /// `cancelled` is reachable from every non-delivered state, including
    /// itself, so cancelling twice is a no-op rather than an error.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self.status, next) {
            (Pending, Processing) => true,
            (Processing, Shipped) => true,
            (Shipped, Delivered) => true,
            (Delivered, _) => false,
            (_, Cancelled) => true,
            _ => false,
        }
    }

    /// Moves along the strict chain.
    ///
    /// ## Errors
    /// `InvalidTransition` for any edge not in the chain, including skips
    /// like pending straight to shipped.
    pub fn transition_to(&mut self, next: OrderStatus, now: DateTime<Utc>) -> CoreResult<()> {
        if !self.can_transition_to(next) {
            return Err(CoreError::invalid_transition(
                "Order",
                &self.id,
                self.status.to_string(),
                format!("transition to {next}"),
            ));
        }
        if next == OrderStatus::Delivered {
            self.is_delivered = true;
            self.delivered_at = Some(now);
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Cancels the order.
    ///
    /// ## Errors
    /// `InvalidTransition` once the order has been delivered. The
    /// `is_delivered` flag is the guard, not the status field, because the
    /// flag is what delivery tracking owns.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.is_delivered || self.status == OrderStatus::Delivered {
            return Err(CoreError::invalid_transition(
                "Order",
                &self.id,
                self.status.to_string(),
                "cancel",
            ));
        }
        self.status = OrderStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    /// Records a successful charge. Independent of the status field.
    pub fn mark_paid(&mut self, receipt: &GatewayReceipt, now: DateTime<Utc>) {
        self.is_paid = true;
        self.paid_at = Some(now);
        self.gateway_reference = Some(receipt.reference.clone());
        self.payer_email = receipt.payer_email.clone();
        self.updated_at = now;
    }

    /// Delivery cascade: the parcel went out for delivery.
    ///
    /// Direct set, no chain check. Returns the previous status so the
    /// caller can log cascades that overrode a terminal state.
    pub fn mark_shipped(&mut self, now: DateTime<Utc>) -> OrderStatus {
        let previous = self.status;
        self.status = OrderStatus::Shipped;
        self.updated_at = now;
        previous
    }

    /// Delivery cascade: the parcel arrived.
    ///
    /// Direct set, no chain check. Sets the delivered flag and timestamp
    /// alongside the status. Returns the previous status.
    pub fn mark_delivered(&mut self, now: DateTime<Utc>) -> OrderStatus {
        let previous = self.status;
        self.status = OrderStatus::Delivered;
        self.is_delivered = true;
        self.delivered_at = Some(now);
        self.updated_at = now;
        previous
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
