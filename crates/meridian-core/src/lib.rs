//! # meridian-core: Pure Business Rules for Meridian
//!
//! This crate is the **heart** of the Meridian consistency engine. It contains
//! the stock ledger, the coupon evaluator, and the order/delivery/payment
//! state machines as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Meridian Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                External callers (HTTP layer, admin tools)       │   │
//! │  │    place_order, update_delivery_status, process_refund, ...    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    meridian-engine                              │   │
//! │  │    Checkout, Fulfillment, Payments, Sweeper, Relay             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ meridian-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │  ┌───────────┐ ┌───────────┐ ┌──────────┐ ┌────────────────┐  │   │
//! │  │  │ inventory │ │  coupon   │ │  order   │ │ delivery       │  │   │
//! │  │  │  ledger + │ │ validity+ │ │  cancel/ │ │ payment        │  │   │
//! │  │  │  reserve  │ │ discount  │ │  paid    │ │ state machines │  │   │
//! │  │  └───────────┘ └───────────┘ └──────────┘ └────────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK READS • PURE FUNCTIONS       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    meridian-db (Database Layer)                 │   │
//! │  │        SQLite queries, guarded updates, migrations              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Shared types (Actor, Role, Product, TaxRate)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`inventory`] - Stock ledger: add/remove/reserve/release, status rules
//! - [`coupon`] - Coupon validity and discount calculation
//! - [`order`] - Order lifecycle rules and price breakdown
//! - [`delivery`] - Delivery tracking sub-state-machine
//! - [`payment`] - Payment/refund sub-state-machine
//! - [`notification`] - Notification records queued by transitions
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every rule is deterministic - `now` is always a parameter
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Integer Money**: All monetary values are in cents (i64) to avoid float errors
//! 4. **Explicit Errors**: All errors are typed, never strings or panics
//!
//! ## Example Usage
//!
//! ```rust
//! use meridian_core::money::Money;
//! use meridian_core::coupon::{Coupon, DiscountType};
//!
//! # fn demo(coupon: &Coupon, now: chrono::DateTime<chrono::Utc>) {
//! // A 10% coupon capped at $50 on a $1,000 order yields $50, not $100.
//! let discount = coupon.calculate_discount(Money::from_cents(100_000), now);
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod coupon;
pub mod delivery;
pub mod error;
pub mod inventory;
pub mod money;
pub mod notification;
pub mod order;
pub mod payment;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use meridian_core::Money` instead of
// `use meridian_core::money::Money`

pub use coupon::{Coupon, DiscountType};
pub use delivery::{Delivery, DeliveryCascade, DeliveryEvent, DeliveryStatus, DeliveryTransition};
pub use error::{CoreError, CoreResult, ValidationError};
pub use inventory::{
    InventoryRecord, Reservation, ReservationStatus, StockEntry, StockEntryKind, StockMovement,
    StockStatus,
};
pub use money::Money;
pub use notification::{NewNotification, Notification, NotificationKind, NotificationPriority};
pub use order::{
    items_total, GatewayReceipt, Order, OrderItem, OrderStatus, OrderTotals, PaymentMethod,
    ShippingAddress,
};
pub use payment::{Payment, PaymentStatus, RefundStatus};
pub use types::{Actor, Product, Role, TaxRate};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default store ID for single-store deployments.
///
/// ## Why a constant?
/// The schema keys inventory by (product, store) for multi-store readiness,
/// but a single-store deployment never supplies a store id. This constant is
/// used wherever a caller leaves the store implicit.
pub const DEFAULT_STORE_ID: &str = "00000000-0000-0000-0000-000000000001";

/// Maximum lines allowed in a single order.
///
/// ## Business Reason
/// Prevents runaway carts and keeps checkout reservation loops bounded.
pub const MAX_ORDER_ITEMS: usize = 100;

/// Maximum quantity of a single line item.
///
/// ## Business Reason
/// Prevents accidental over-ordering (e.g., typing 1000 instead of 10).
pub const MAX_ITEM_QUANTITY: i64 = 999;
