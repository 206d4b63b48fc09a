//! # Delivery Tracking
//!
//! Courier-side fulfilment state for one order.
//!
//! ## Status Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  pending → assigned → picked_up → in_transit → out_for_delivery         │
//! │                                                      │                  │
//! │                              delivered ◄─────────────┤                  │
//! │                              failed    ◄─────────────┤ (attempt + 1)    │
//! │                              returned / cancelled                       │
//! │                                                                         │
//! │  Cascades into the order:                                               │
//! │    out_for_delivery  → order becomes shipped                            │
//! │    delivered         → order becomes delivered                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The flow above is the expected path, not an enforced one. `apply_status`
//! accepts any status from any status and appends to the event history
//! unconditionally. Dispatchers use this to fix mislabelled parcels, so the
//! looseness is intentional; the only concession is that leaving a terminal
//! state is reported back so callers can log it. What IS enforced: the
//! pickup and delivery timestamps are written exactly once, ratings only
//! exist for delivered parcels, and every change lands in the history.

use crate::error::{CoreError, CoreResult};
use crate::validation::validate_rating;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Delivery Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum DeliveryStatus {
    Pending,
    Assigned,
    PickedUp,
    InTransit,
    OutForDelivery,
    Delivered,
    Failed,
    Cancelled,
    Returned,
}

impl DeliveryStatus {
    /// Failed is retryable, so it is not terminal.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered | DeliveryStatus::Cancelled | DeliveryStatus::Returned
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Assigned => write!(f, "assigned"),
            DeliveryStatus::PickedUp => write!(f, "picked_up"),
            DeliveryStatus::InTransit => write!(f, "in_transit"),
            DeliveryStatus::OutForDelivery => write!(f, "out_for_delivery"),
            DeliveryStatus::Delivered => write!(f, "delivered"),
            DeliveryStatus::Failed => write!(f, "failed"),
            DeliveryStatus::Cancelled => write!(f, "cancelled"),
            DeliveryStatus::Returned => write!(f, "returned"),
        }
    }
}

// =============================================================================
// Transition Outcome
// =============================================================================

/// Order-side effect a delivery status change asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryCascade {
    /// Parcel is on the truck: the order moves to shipped.
    OrderShipped,
    /// Parcel arrived: the order moves to delivered.
    OrderDelivered,
}

/// What `apply_status` did, for the caller to persist and log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryTransition {
    pub previous: DeliveryStatus,
    pub cascade: Option<DeliveryCascade>,
    /// True when the change pulled the parcel out of a terminal state.
    /// Legal, but worth a log line.
    pub left_terminal: bool,
}

// =============================================================================
// Delivery
// =============================================================================

/// Fulfilment record, one per order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Delivery {
    pub id: String,
    pub order_id: String,
    pub tracking_number: String,
    pub status: DeliveryStatus,
    pub courier_id: Option<String>,
    pub courier_name: Option<String>,
    pub current_location: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    /// Written exactly once, on the first pass through picked_up.
    pub pickup_time: Option<DateTime<Utc>>,
    /// Written exactly once, on the first pass through delivered.
    pub actual_delivery_time: Option<DateTime<Utc>>,
    pub delivery_attempts: i64,
    pub failure_reason: Option<String>,
    pub return_reason: Option<String>,
    pub proof_photo: Option<String>,
    pub proof_signature: Option<String>,
    pub proof_received_by: Option<String>,
    pub rating: Option<i64>,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// Applies a status change.
    ///
    /// Never fails and never filters: any status is settable from any
    /// status, and the caller appends the matching history event
    /// unconditionally. Side effects by target status:
    ///
    /// - `picked_up`: stamps `pickup_time` if not already stamped
    /// - `delivered`: stamps `actual_delivery_time` if not already stamped
    /// - `failed`: bumps `delivery_attempts`, records `remarks` as the
    ///   failure reason
    /// - `returned`: records `remarks` as the return reason
    pub fn apply_status(
        &mut self,
        next: DeliveryStatus,
        remarks: Option<&str>,
        location: Option<&str>,
        now: DateTime<Utc>,
    ) -> DeliveryTransition {
        let previous = self.status;
        let left_terminal = previous.is_terminal() && next != previous;

        self.status = next;
        if let Some(location) = location {
            self.current_location = Some(location.to_string());
        }

        match next {
            DeliveryStatus::PickedUp => {
                if self.pickup_time.is_none() {
                    self.pickup_time = Some(now);
                }
            }
            DeliveryStatus::Delivered => {
                if self.actual_delivery_time.is_none() {
                    self.actual_delivery_time = Some(now);
                }
            }
            DeliveryStatus::Failed => {
                self.delivery_attempts += 1;
                if let Some(remarks) = remarks {
                    self.failure_reason = Some(remarks.to_string());
                }
            }
            DeliveryStatus::Returned => {
                if let Some(remarks) = remarks {
                    self.return_reason = Some(remarks.to_string());
                }
            }
            _ => {}
        }

        self.updated_at = now;

        let cascade = match next {
            DeliveryStatus::OutForDelivery => Some(DeliveryCascade::OrderShipped),
            DeliveryStatus::Delivered => Some(DeliveryCascade::OrderDelivered),
            _ => None,
        };

        DeliveryTransition {
            previous,
            cascade,
            left_terminal,
        }
    }

    /// Attaches a courier. The caller follows up with an `assigned` status
    /// change carrying the "Assigned to {name}" remark.
    pub fn assign_courier(
        &mut self,
        courier_id: impl Into<String>,
        courier_name: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.courier_id = Some(courier_id.into());
        self.courier_name = Some(courier_name.into());
        self.updated_at = now;
    }

    /// Records proof of delivery.
    pub fn record_proof(
        &mut self,
        photo: Option<String>,
        signature: Option<String>,
        received_by: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.proof_photo = photo;
        self.proof_signature = signature;
        self.proof_received_by = received_by;
        self.updated_at = now;
    }

    /// Records the customer's rating.
    ///
    /// ## Errors
    /// `InvalidTransition` unless the parcel is delivered. Ownership of the
    /// underlying order is the caller's check; this record does not know
    /// the customer.
    pub fn rate(
        &mut self,
        rating: i64,
        feedback: Option<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        validate_rating(rating)?;
        if self.status != DeliveryStatus::Delivered {
            return Err(CoreError::invalid_transition(
                "Delivery",
                &self.id,
                self.status.to_string(),
                "rate",
            ));
        }
        self.rating = Some(rating);
        self.feedback = feedback;
        self.updated_at = now;
        Ok(())
    }
}

// =============================================================================
// Delivery Events
// =============================================================================

/// One line of the append-only status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct DeliveryEvent {
    pub id: String,
    pub delivery_id: String,
    pub status: DeliveryStatus,
    pub remarks: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================
