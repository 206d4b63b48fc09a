//! # Payments Service
//!
//! Gateway settlement, retries, and the refund desk.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Settlement and Refunds                             │
//! │                                                                         │
//! │  confirm        gateway says paid: payment → success, order → paid      │
//! │  report_failure gateway says no: → failed, retry_count + 1              │
//! │  retry          failed → processing, back through the gateway           │
//! │  cancel         abandon an unsettled payment                            │
//! │                                                                         │
//! │  request_refund  customer opens the case          (success only)        │
//! │  advance_refund  admin works it: requested → processing →               │
//! │                  completed | rejected                                   │
//! │                  completion forces the payment into refunded            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The paid flag on the order is set here, when the gateway confirms, and
//! nowhere else. It is independent of the order's fulfilment status; a
//! pending order can be paid and a shipped cash order can still be unpaid.

use chrono::Utc;
use meridian_core::validation::validate_reason;
use meridian_core::{
    Actor, CoreError, GatewayReceipt, Money, NewNotification, NotificationKind,
    NotificationPriority, Order, Payment, RefundStatus,
};
use meridian_db::Database;
use std::sync::Arc;
use tracing::info;

use crate::error::EngineResult;

/// Payment settlement and refund operations.
pub struct PaymentsService {
    db: Arc<Database>,
}

impl PaymentsService {
    pub fn new(db: Arc<Database>) -> Self {
        PaymentsService { db }
    }

    // -------------------------------------------------------------------------
    // Settlement
    // -------------------------------------------------------------------------

    /// Records a successful charge and marks the order paid.
    ///
    /// The raw receipt is kept on the payment for dispute handling; the
    /// order gets the gateway reference and payer email. Cash on delivery
    /// settles through the same path when the courier hands over the
    /// receipt.
    ///
    /// ## Errors
    /// `InvalidTransition` when the payment already settled.
    pub async fn confirm(
        &self,
        actor: &Actor,
        payment_id: &str,
        receipt: GatewayReceipt,
    ) -> EngineResult<(Payment, Order)> {
        let mut payment = self.require_payment(payment_id).await?;
        actor.require_owner_or_admin(&payment.user_id, "confirm this payment")?;

        let now = Utc::now();
        let previous_status = payment.status;
        let previous_refund = payment.refund_status;
        let response = serde_json::to_string(&receipt)?;
        payment.mark_success(Some(response), now)?;

        let note = NewNotification::new(
            &payment.user_id,
            NotificationKind::PaymentReceived,
            "Payment received",
            format!(
                "Your payment of {} for order {} was received.",
                Money::from_cents(payment.amount_cents),
                payment.order_id
            ),
        )
        .with_order(payment.order_id.as_str())
        .with_priority(NotificationPriority::High);

        self.db
            .payments()
            .persist(&payment, previous_status, previous_refund, &[note])
            .await?;

        // Reflect the settlement onto the order. Independent of order
        // status: a still-pending order can be paid.
        let mut order = self.require_order(&payment.order_id).await?;
        order.mark_paid(&receipt, now);
        self.db.orders().persist_paid(&order, &[]).await?;

        info!(
            payment_id = %payment.id,
            order_id = %order.id,
            amount = %Money::from_cents(payment.amount_cents),
            "Payment confirmed"
        );
        Ok((payment, order))
    }

    /// Records a failed charge. Every failure bumps the retry counter.
    pub async fn report_failure(
        &self,
        actor: &Actor,
        payment_id: &str,
        reason: &str,
    ) -> EngineResult<Payment> {
        let mut payment = self.require_payment(payment_id).await?;
        actor.require_owner_or_admin(&payment.user_id, "update this payment")?;

        let previous_status = payment.status;
        let previous_refund = payment.refund_status;
        payment.mark_failed(reason, Utc::now())?;

        let note = NewNotification::new(
            &payment.user_id,
            NotificationKind::PaymentFailed,
            "Payment failed",
            format!(
                "Your payment for order {} failed: {}. You can retry from your orders page.",
                payment.order_id, reason
            ),
        )
        .with_order(payment.order_id.as_str())
        .with_priority(NotificationPriority::High);

        self.db
            .payments()
            .persist(&payment, previous_status, previous_refund, &[note])
            .await?;

        info!(
            payment_id = %payment.id,
            retry_count = payment.retry_count,
            reason,
            "Payment failed"
        );
        Ok(payment)
    }

    /// Puts a failed payment back through the gateway.
    pub async fn retry(&self, actor: &Actor, payment_id: &str) -> EngineResult<Payment> {
        let mut payment = self.require_payment(payment_id).await?;
        actor.require_owner_or_admin(&payment.user_id, "retry this payment")?;

        let previous_status = payment.status;
        let previous_refund = payment.refund_status;
        payment.retry(Utc::now())?;
        self.db
            .payments()
            .persist(&payment, previous_status, previous_refund, &[])
            .await?;

        info!(payment_id = %payment.id, "Payment retried");
        Ok(payment)
    }

    /// Abandons an unsettled payment. Admin only; customers abandon by
    /// cancelling the order.
    pub async fn cancel(&self, actor: &Actor, payment_id: &str) -> EngineResult<Payment> {
        actor.require_admin("cancel a payment")?;
        let mut payment = self.require_payment(payment_id).await?;

        let previous_status = payment.status;
        let previous_refund = payment.refund_status;
        payment.cancel(Utc::now())?;
        self.db
            .payments()
            .persist(&payment, previous_status, previous_refund, &[])
            .await?;

        info!(payment_id = %payment.id, "Payment cancelled");
        Ok(payment)
    }

    // -------------------------------------------------------------------------
    // Refunds
    // -------------------------------------------------------------------------

    /// Opens a refund case on a successful payment.
    ///
    /// ## Errors
    /// `InvalidRefund` when the payment is not in success, the refund has
    /// already completed, or the amount exceeds what was paid.
    pub async fn request_refund(
        &self,
        actor: &Actor,
        payment_id: &str,
        amount_cents: i64,
        reason: &str,
    ) -> EngineResult<Payment> {
        let mut payment = self.require_payment(payment_id).await?;
        actor.require_owner_or_admin(&payment.user_id, "request a refund")?;
        validate_reason(reason).map_err(CoreError::from)?;

        let previous_status = payment.status;
        let previous_refund = payment.refund_status;
        payment.request_refund(amount_cents, reason, Utc::now())?;
        self.db
            .payments()
            .persist(&payment, previous_status, previous_refund, &[])
            .await?;

        info!(
            payment_id = %payment.id,
            amount = %Money::from_cents(amount_cents),
            "Refund requested"
        );
        Ok(payment)
    }

    /// Moves a refund case along: requested to processing or rejected,
    /// processing to completed or rejected. Completion flips the payment
    /// to refunded and notifies the customer.
    pub async fn advance_refund(
        &self,
        actor: &Actor,
        payment_id: &str,
        next: RefundStatus,
    ) -> EngineResult<Payment> {
        actor.require_admin("process a refund")?;
        let mut payment = self.require_payment(payment_id).await?;

        let previous_status = payment.status;
        let previous_refund = payment.refund_status;
        payment.advance_refund(next, Utc::now())?;

        let notes = if next == RefundStatus::Completed {
            vec![NewNotification::new(
                &payment.user_id,
                NotificationKind::RefundCompleted,
                "Refund completed",
                format!(
                    "Your refund of {} for order {} has been completed.",
                    Money::from_cents(payment.refund_amount_cents.unwrap_or(payment.amount_cents)),
                    payment.order_id
                ),
            )
            .with_order(payment.order_id.as_str())
            .with_priority(NotificationPriority::High)]
        } else {
            Vec::new()
        };

        self.db
            .payments()
            .persist(&payment, previous_status, previous_refund, &notes)
            .await?;

        info!(
            payment_id = %payment.id,
            refund_status = %next,
            "Refund advanced"
        );
        Ok(payment)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// A payment, for its owner or an admin.
    pub async fn get_payment(&self, actor: &Actor, payment_id: &str) -> EngineResult<Payment> {
        let payment = self.require_payment(payment_id).await?;
        actor.require_owner_or_admin(&payment.user_id, "view this payment")?;
        Ok(payment)
    }

    /// Looks a payment up by the transaction id on the customer receipt.
    /// Support staff verify disputed charges through this.
    pub async fn verify(&self, actor: &Actor, transaction_id: &str) -> EngineResult<Payment> {
        let payment = self
            .db
            .payments()
            .get_by_transaction_id(transaction_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Payment", transaction_id))?;
        actor.require_owner_or_admin(&payment.user_id, "view this payment")?;
        Ok(payment)
    }

    /// Every payment attempt for an order, oldest first.
    pub async fn list_for_order(&self, actor: &Actor, order_id: &str) -> EngineResult<Vec<Payment>> {
        let order = self.require_order(order_id).await?;
        actor.require_owner_or_admin(&order.user_id, "view payments for this order")?;
        Ok(self.db.payments().list_for_order(order_id).await?)
    }

    /// The refund desk queue: requested and in-progress cases, oldest
    /// update first.
    pub async fn list_open_refunds(&self, actor: &Actor) -> EngineResult<Vec<Payment>> {
        actor.require_admin("list open refunds")?;
        Ok(self.db.payments().list_open_refunds().await?)
    }

    async fn require_payment(&self, payment_id: &str) -> EngineResult<Payment> {
        let payment = self.db.payments().get_by_id(payment_id).await?;
        payment.ok_or_else(|| CoreError::not_found("Payment", payment_id).into())
    }

    async fn require_order(&self, order_id: &str) -> EngineResult<Order> {
        let order = self.db.orders().get_by_id(order_id).await?;
        order.ok_or_else(|| CoreError::not_found("Order", order_id).into())
    }
}

// =============================================================================
// Tests
// =============================================================================
