//! # Inventory Ledger
//!
//! Stock levels, the append-only movement ledger, and reservations.
//!
//! ## Stock Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Inventory Record                                   │
//! │                                                                         │
//! │  current_stock   - physical units on the shelf                          │
//! │  reserved_stock  - units promised to unpaid/unshipped orders            │
//! │  available       - max(0, current - reserved)  ← what customers see     │
//! │                                                                         │
//! │       add_stock ──────────┐                                             │
//! │       record_return ──────┤ current += qty                              │
//! │                           │                                             │
//! │       remove_stock ───────┐                                             │
//! │       record_loss ────────┤ current -= qty                              │
//! │                           │                                             │
//! │       reserve ────────────┐ reserved += qty  (checked vs available)     │
//! │       release ────────────┤ reserved -= qty  (clamped at 0)             │
//! │       commit ─────────────┤ reserved -= qty AND current -= qty          │
//! │                                                                         │
//! │  Every physical movement appends a StockEntry. Reservations do not      │
//! │  touch the ledger until committed.                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ledger Invariant
//! Entry quantities are signed. For a record that started at zero, the sum
//! of all its entry quantities equals `current_stock`. Adjustments record
//! the delta between the old and new totals, so the invariant survives
//! manual corrections.

use crate::error::{CoreError, CoreResult};
use crate::validation::validate_quantity;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Status Enums
// =============================================================================

/// Derived stock status.
///
/// `Discontinued` is set and cleared by hand; the other three are derived
/// from `current_stock` against `min_stock_level` after every movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum StockStatus {
    InStock,
    LowStock,
    OutOfStock,
    Discontinued,
}

impl StockStatus {
    /// Derives status from a stock level.
    ///
    /// `Discontinued` is sticky: once a record is discontinued, movements
    /// keep it discontinued until someone reinstates it.
    pub fn derive(current_stock: i64, min_stock_level: i64, previous: StockStatus) -> StockStatus {
        if previous == StockStatus::Discontinued {
            return StockStatus::Discontinued;
        }
        if current_stock == 0 {
            StockStatus::OutOfStock
        } else if current_stock <= min_stock_level {
            StockStatus::LowStock
        } else {
            StockStatus::InStock
        }
    }
}

impl fmt::Display for StockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StockStatus::InStock => write!(f, "in_stock"),
            StockStatus::LowStock => write!(f, "low_stock"),
            StockStatus::OutOfStock => write!(f, "out_of_stock"),
            StockStatus::Discontinued => write!(f, "discontinued"),
        }
    }
}

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum StockEntryKind {
    /// Restock from a supplier.
    In,
    /// Fulfilled order leaving the shelf.
    Out,
    /// Manual correction to a counted total.
    Adjustment,
    /// Write-off: past expiry date.
    Expired,
    /// Write-off: damaged units.
    Damaged,
    /// Customer return back to the shelf.
    Return,
}

impl fmt::Display for StockEntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StockEntryKind::In => write!(f, "in"),
            StockEntryKind::Out => write!(f, "out"),
            StockEntryKind::Adjustment => write!(f, "adjustment"),
            StockEntryKind::Expired => write!(f, "expired"),
            StockEntryKind::Damaged => write!(f, "damaged"),
            StockEntryKind::Return => write!(f, "return"),
        }
    }
}

// =============================================================================
// Stock Movement
// =============================================================================

/// The ledger delta produced by a successful mutation.
///
/// Mutation methods on [`InventoryRecord`] return one of these; the storage
/// layer turns it into a persisted [`StockEntry`] row with an id and
/// timestamp. Quantities are signed (restocks positive, removals negative).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub kind: StockEntryKind,
    pub quantity: i64,
    pub reason: Option<String>,
    pub reference: Option<String>,
}

impl StockMovement {
    fn new(kind: StockEntryKind, quantity: i64) -> Self {
        StockMovement {
            kind,
            quantity,
            reason: None,
            reference: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a reference (order id, supplier invoice, audit ticket).
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

// =============================================================================
// Inventory Record
// =============================================================================

/// Per-store stock record for one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct InventoryRecord {
    pub id: String,
    pub product_id: String,
    pub store_id: String,
    pub current_stock: i64,
    pub reserved_stock: i64,
    pub min_stock_level: i64,
    pub max_stock_level: i64,
    pub reorder_point: i64,
    pub reorder_quantity: i64,
    pub status: StockStatus,
    pub last_restocked: Option<DateTime<Utc>>,
    /// Bumped on every write. Lets callers detect concurrent edits.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryRecord {
    /// Stock a customer can still claim, floored at zero.
    ///
    /// Every mutation keeps `reserved_stock <= current_stock`, so the floor
    /// only matters for rows written by older code or edited by hand.
    #[inline]
    pub fn available_stock(&self) -> i64 {
        (self.current_stock - self.reserved_stock).max(0)
    }

    /// True when the total has drained to the reorder point.
    #[inline]
    pub fn needs_reorder(&self) -> bool {
        self.current_stock <= self.reorder_point
    }

    fn refresh_status(&mut self) {
        self.status = StockStatus::derive(self.current_stock, self.min_stock_level, self.status);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }

    // -------------------------------------------------------------------------
    // Ledger operations (physical stock)
    // -------------------------------------------------------------------------

    /// Restock from a supplier.
    ///
    /// Increments `current_stock`, stamps `last_restocked`, and re-derives
    /// status. Returns the `in` movement for the ledger.
    pub fn add_stock(&mut self, quantity: i64, now: DateTime<Utc>) -> CoreResult<StockMovement> {
        validate_quantity(quantity)?;
        self.current_stock += quantity;
        self.last_restocked = Some(now);
        self.refresh_status();
        self.touch(now);
        Ok(StockMovement::new(StockEntryKind::In, quantity))
    }

    /// Removes fulfilled stock from the shelf.
    ///
    /// ## Errors
    /// `InsufficientStock` when the requested quantity exceeds
    /// [`available_stock`](Self::available_stock). Reserved units are not
    /// removable through this path; commit the reservation instead.
    pub fn remove_stock(&mut self, quantity: i64, now: DateTime<Utc>) -> CoreResult<StockMovement> {
        validate_quantity(quantity)?;
        let available = self.available_stock();
        if quantity > available {
            return Err(CoreError::InsufficientStock {
                product_id: self.product_id.clone(),
                available,
                requested: quantity,
            });
        }
        self.current_stock -= quantity;
        self.refresh_status();
        self.touch(now);
        Ok(StockMovement::new(StockEntryKind::Out, -quantity))
    }

    /// Corrects `current_stock` to a counted total.
    ///
    /// The movement records the signed delta between the old and new totals
    /// so the ledger still sums to the current level. A no-op count (same
    /// total) still succeeds and returns a zero-quantity movement.
    ///
    /// The new total cannot drop below `reserved_stock`; release the
    /// affected reservations before counting the shelf down that far.
    pub fn adjust_stock(&mut self, new_total: i64, now: DateTime<Utc>) -> CoreResult<StockMovement> {
        if new_total < self.reserved_stock {
            return Err(crate::error::ValidationError::OutOfRange {
                field: "new_total".to_string(),
                min: self.reserved_stock,
                max: i64::MAX,
            }
            .into());
        }
        let delta = new_total - self.current_stock;
        self.current_stock = new_total;
        self.refresh_status();
        self.touch(now);
        Ok(StockMovement::new(StockEntryKind::Adjustment, delta))
    }

    /// Writes off expired or damaged units.
    ///
    /// Unlike [`remove_stock`], destroyed stock does not respect holds: the
    /// write-off is checked against on-hand stock only, and `reserved_stock`
    /// is clamped down to the new `current_stock` when the loss eats into a
    /// reservation. Physically gone units cannot stay promised to an order.
    ///
    /// [`remove_stock`]: Self::remove_stock
    pub fn record_loss(
        &mut self,
        quantity: i64,
        kind: StockEntryKind,
        now: DateTime<Utc>,
    ) -> CoreResult<StockMovement> {
        debug_assert!(matches!(
            kind,
            StockEntryKind::Expired | StockEntryKind::Damaged
        ));
        validate_quantity(quantity)?;
        if quantity > self.current_stock {
            return Err(CoreError::InsufficientStock {
                product_id: self.product_id.clone(),
                available: self.current_stock,
                requested: quantity,
            });
        }
        self.current_stock -= quantity;
        self.reserved_stock = self.reserved_stock.min(self.current_stock);
        self.refresh_status();
        self.touch(now);
        Ok(StockMovement::new(kind, -quantity))
    }

    /// Restocks returned units.
    pub fn record_return(&mut self, quantity: i64, now: DateTime<Utc>) -> CoreResult<StockMovement> {
        validate_quantity(quantity)?;
        self.current_stock += quantity;
        self.refresh_status();
        self.touch(now);
        Ok(StockMovement::new(StockEntryKind::Return, quantity))
    }

    // -------------------------------------------------------------------------
    // Reservation operations (promised stock)
    // -------------------------------------------------------------------------

    /// Reserves available stock for an order.
    ///
    /// The check and the increment are a single step here; the storage layer
    /// mirrors this as one conditional UPDATE so two concurrent orders can
    /// never both claim the last unit.
    pub fn reserve(&mut self, quantity: i64, now: DateTime<Utc>) -> CoreResult<()> {
        validate_quantity(quantity)?;
        let available = self.available_stock();
        if quantity > available {
            return Err(CoreError::InsufficientStock {
                product_id: self.product_id.clone(),
                available,
                requested: quantity,
            });
        }
        self.reserved_stock += quantity;
        self.touch(now);
        Ok(())
    }

    /// Releases a reservation back to the pool.
    ///
    /// Clamps at zero instead of failing: releasing more than is reserved
    /// (double release, sweep racing a cancel) is a no-op beyond draining
    /// the counter. This makes release safe to retry.
    pub fn release(&mut self, quantity: i64, now: DateTime<Utc>) -> CoreResult<()> {
        validate_quantity(quantity)?;
        self.reserved_stock = (self.reserved_stock - quantity).max(0);
        self.touch(now);
        Ok(())
    }

    /// Commits a reservation: the promised units physically leave the shelf.
    ///
    /// Drops both counters together. The reserved counter clamps at zero
    /// like [`release`](Self::release); the physical side requires
    /// `current_stock >= quantity`.
    pub fn commit_reservation(
        &mut self,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> CoreResult<StockMovement> {
        validate_quantity(quantity)?;
        if quantity > self.current_stock {
            return Err(CoreError::InsufficientStock {
                product_id: self.product_id.clone(),
                available: self.current_stock,
                requested: quantity,
            });
        }
        self.current_stock -= quantity;
        self.reserved_stock = (self.reserved_stock - quantity).max(0);
        self.refresh_status();
        self.touch(now);
        Ok(StockMovement::new(StockEntryKind::Out, -quantity))
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Marks the record discontinued. Status stays pinned until reinstated.
    pub fn discontinue(&mut self, now: DateTime<Utc>) {
        self.status = StockStatus::Discontinued;
        self.touch(now);
    }

    /// Clears the discontinued pin and re-derives status from stock levels.
    pub fn reinstate(&mut self, now: DateTime<Utc>) {
        self.status = StockStatus::derive(self.current_stock, self.min_stock_level, StockStatus::InStock);
        self.touch(now);
    }
}

// =============================================================================
// Stock Entry
// =============================================================================

/// One persisted line of the append-only movement ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockEntry {
    pub id: String,
    pub inventory_id: String,
    pub kind: StockEntryKind,
    /// Signed: restocks and returns positive, removals and losses negative,
    /// adjustments either way.
    pub quantity: i64,
    pub reason: Option<String>,
    pub reference: Option<String>,
    pub actor_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Reservations
// =============================================================================

/// Reservation lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum ReservationStatus {
    /// Stock is promised and counted in `reserved_stock`.
    Held,
    /// Promise fulfilled: the stock left the shelf.
    Committed,
    /// Promise cancelled: the stock went back to the pool.
    Released,
    /// Promise timed out and was swept back to the pool.
    Expired,
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationStatus::Held => write!(f, "held"),
            ReservationStatus::Committed => write!(f, "committed"),
            ReservationStatus::Released => write!(f, "released"),
            ReservationStatus::Expired => write!(f, "expired"),
        }
    }
}

/// A record of stock promised to an order.
///
/// Reservations exist so the promise is auditable and reclaimable. Without
/// them, `reserved_stock` is a bare counter that leaks forever when an
/// order is abandoned. Each held reservation carries an expiry; a sweeper
/// releases the ones that outlive it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Reservation {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub store_id: String,
    pub quantity: i64,
    pub status: ReservationStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// True while the promise still holds stock.
    #[inline]
    pub fn is_held(&self) -> bool {
        self.status == ReservationStatus::Held
    }

    /// True when a held reservation has outlived its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_held() && now >= self.expires_at
    }

    /// Expiry deadline for a reservation created at `now`.
    pub fn expiry_from(now: DateTime<Utc>, ttl_minutes: i64) -> DateTime<Utc> {
        now + Duration::minutes(ttl_minutes)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
