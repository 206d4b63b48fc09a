//! # Payment Reconciliation
//!
//! Payment state, gateway retries, and the refund sub-state.
//!
//! ## State Machines
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Payment                                                                │
//! │                                                                         │
//! │   pending ──┬──► processing ──┬──► success ──► refunded                 │
//! │             │        │        │      (via completed refund)             │
//! │             │        ▼        │                                         │
//! │             └──► failed ──────┘  (each failure bumps retry_count;       │
//! │                    │              failed retries back to processing)    │
//! │                    ▼                                                    │
//! │               cancelled                                                 │
//! │                                                                         │
//! │  Refund sub-state                                                       │
//! │                                                                         │
//! │   none ──► requested ──► processing ──► completed                       │
//! │                 │             │                                         │
//! │                 └─────────────┴───────► rejected (re-requestable)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Success must be reflected onto the order (`is_paid`) by the caller; the
//! payment record does not reach across entities itself.

use crate::error::{CoreError, CoreResult};
use crate::order::PaymentMethod;
use crate::validation::validate_payment_amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Status Enums
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum PaymentStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Refunded,
    Cancelled,
}

impl PaymentStatus {
    /// Active payments block a second payment for the same order.
    #[inline]
    pub const fn is_active(&self) -> bool {
        !matches!(self, PaymentStatus::Failed | PaymentStatus::Cancelled)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Processing => write!(f, "processing"),
            PaymentStatus::Success => write!(f, "success"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Refunded => write!(f, "refunded"),
            PaymentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Refund progression. Lives inside the payment, not as its own entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum RefundStatus {
    None,
    Requested,
    Processing,
    Completed,
    Rejected,
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefundStatus::None => write!(f, "none"),
            RefundStatus::Requested => write!(f, "requested"),
            RefundStatus::Processing => write!(f, "processing"),
            RefundStatus::Completed => write!(f, "completed"),
            RefundStatus::Rejected => write!(f, "rejected"),
        }
    }
}

// =============================================================================
// Payment
// =============================================================================

/// Charge attempt for one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub user_id: String,
    pub transaction_id: String,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub gateway: Option<String>,
    pub status: PaymentStatus,
    pub payment_date: Option<DateTime<Utc>>,
    /// Gateway attempts that came back failed.
    pub retry_count: i64,
    /// Raw gateway payload, JSON, kept for dispute handling.
    pub gateway_response: Option<String>,
    pub failure_reason: Option<String>,
    pub refund_status: RefundStatus,
    pub refund_amount_cents: Option<i64>,
    pub refund_reason: Option<String>,
    pub refund_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Starting status for a new payment. Cash settles at the door, so it
    /// waits in pending; gateway methods go straight to processing.
    pub fn initial_status(method: PaymentMethod) -> PaymentStatus {
        if method.is_prepaid() {
            PaymentStatus::Processing
        } else {
            PaymentStatus::Pending
        }
    }

    fn guard_settleable(&self, attempted: &str) -> CoreResult<()> {
        match self.status {
            PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::Failed => Ok(()),
            _ => Err(CoreError::invalid_transition(
                "Payment",
                &self.id,
                self.status.to_string(),
                attempted,
            )),
        }
    }

    /// Gateway reported the charge went through.
    ///
    /// The caller follows up by marking the order paid.
    ///
    /// ## Errors
    /// `InvalidTransition` when the payment already settled (success,
    /// refunded, or cancelled).
    pub fn mark_success(
        &mut self,
        gateway_response: Option<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        self.guard_settleable("mark success")?;
        self.status = PaymentStatus::Success;
        self.payment_date = Some(now);
        self.gateway_response = gateway_response;
        self.failure_reason = None;
        self.updated_at = now;
        Ok(())
    }

    /// Gateway reported a failed charge. Each failure bumps `retry_count`.
    pub fn mark_failed(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> CoreResult<()> {
        self.guard_settleable("mark failed")?;
        self.status = PaymentStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.retry_count += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Puts a failed payment back through the gateway.
    pub fn retry(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.status != PaymentStatus::Failed {
            return Err(CoreError::invalid_transition(
                "Payment",
                &self.id,
                self.status.to_string(),
                "retry",
            ));
        }
        self.status = PaymentStatus::Processing;
        self.updated_at = now;
        Ok(())
    }

    /// Abandons an unsettled payment.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        self.guard_settleable("cancel")?;
        self.status = PaymentStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Refunds
    // -------------------------------------------------------------------------

    /// Opens a refund request.
    ///
    /// ## Errors
    /// `InvalidRefund` when the payment is not in success, when a refund
    /// has already completed, or when the amount exceeds what was paid.
    /// A rejected refund can be re-requested; the new request overwrites
    /// the recorded amount and reason.
    pub fn request_refund(
        &mut self,
        amount_cents: i64,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        if self.status != PaymentStatus::Success {
            return Err(CoreError::invalid_refund(format!(
                "payment is {}, only successful payments can be refunded",
                self.status
            )));
        }
        if self.refund_status == RefundStatus::Completed {
            return Err(CoreError::invalid_refund("refund already completed"));
        }
        validate_payment_amount(amount_cents)?;
        if amount_cents > self.amount_cents {
            return Err(CoreError::invalid_refund(format!(
                "refund amount {} exceeds payment amount {}",
                amount_cents, self.amount_cents
            )));
        }

        self.refund_status = RefundStatus::Requested;
        self.refund_amount_cents = Some(amount_cents);
        self.refund_reason = Some(reason.into());
        self.updated_at = now;
        Ok(())
    }

    /// Administrative refund progression.
    ///
    /// Legal moves: requested to processing or rejected, processing to
    /// completed or rejected. Completion forces the payment into refunded
    /// and stamps the refund date.
    pub fn advance_refund(&mut self, next: RefundStatus, now: DateTime<Utc>) -> CoreResult<()> {
        let legal = matches!(
            (self.refund_status, next),
            (RefundStatus::Requested, RefundStatus::Processing)
                | (RefundStatus::Requested, RefundStatus::Rejected)
                | (RefundStatus::Processing, RefundStatus::Completed)
                | (RefundStatus::Processing, RefundStatus::Rejected)
        );
        if !legal {
            return Err(CoreError::invalid_refund(format!(
                "cannot move refund from {} to {}",
                self.refund_status, next
            )));
        }

        self.refund_status = next;
        if next == RefundStatus::Completed {
            self.status = PaymentStatus::Refunded;
            self.refund_date = Some(now);
        }
        self.updated_at = now;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
