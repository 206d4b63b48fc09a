//! # Payment Repository
//!
//! Payment rows and the one-active-payment-per-order rule.
//!
//! ## Concurrency Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  create      INSERT relies on the partial unique index                  │
//! │              (order_id WHERE status NOT IN failed/cancelled):           │
//! │              two racing checkouts cannot both open a live payment       │
//! │                                                                         │
//! │  persist     UPDATE .. WHERE status = <loaded status>                   │
//! │                        AND refund_status = <loaded refund status>       │
//! │              a copy that went stale between load and write loses,       │
//! │              and the re-read names which of the two machines moved      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All state math runs on `meridian_core::Payment`; this module only makes
//! the load-mutate-persist cycle safe against itself.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::notification::insert_notification;
use meridian_core::validation::validate_payment_amount;
use meridian_core::{
    CoreError, NewNotification, Payment, PaymentMethod, PaymentStatus, RefundStatus,
};

const SELECT_COLUMNS: &str = "id, order_id, user_id, transaction_id, amount_cents, method, \
     gateway, status, payment_date, retry_count, gateway_response, failure_reason, \
     refund_status, refund_amount_cents, refund_reason, refund_date, created_at, updated_at";

/// Repository for payment database operations.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    /// Creates a new PaymentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Gets a payment by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Payment>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM payments WHERE id = ?1");
        let payment = sqlx::query_as::<_, Payment>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    /// Gets a payment by the transaction id printed on the receipt.
    pub async fn get_by_transaction_id(&self, transaction_id: &str) -> DbResult<Option<Payment>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM payments WHERE transaction_id = ?1");
        let payment = sqlx::query_as::<_, Payment>(&sql)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    /// The live payment for an order, if one exists. At most one by the
    /// partial unique index.
    pub async fn get_active_for_order(&self, order_id: &str) -> DbResult<Option<Payment>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM payments \
             WHERE order_id = ?1 AND status NOT IN ('failed', 'cancelled')"
        );
        let payment = sqlx::query_as::<_, Payment>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    /// Every charge attempt for an order, oldest first. Dead attempts
    /// included; this is the reconciliation trail.
    pub async fn list_for_order(&self, order_id: &str) -> DbResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM payments WHERE order_id = ?1 ORDER BY created_at, id"
        );
        let payments = sqlx::query_as::<_, Payment>(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(payments)
    }

    /// Refunds awaiting an admin decision, oldest request first.
    pub async fn list_open_refunds(&self) -> DbResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM payments \
             WHERE refund_status IN ('requested', 'processing') \
             ORDER BY updated_at ASC"
        );
        let payments = sqlx::query_as::<_, Payment>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(payments)
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Opens a payment for an order.
    ///
    /// Prepaid methods start in processing, cash on delivery in pending.
    ///
    /// ## Errors
    /// `DuplicateEntity` when the order already has a live payment. Failed
    /// and cancelled attempts do not block a new one.
    pub async fn create(
        &self,
        order_id: &str,
        user_id: &str,
        amount_cents: i64,
        method: PaymentMethod,
        gateway: Option<&str>,
    ) -> DbResult<Payment> {
        validate_payment_amount(amount_cents).map_err(CoreError::from)?;

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            user_id: user_id.to_string(),
            transaction_id: generate_transaction_id(),
            amount_cents,
            method,
            gateway: gateway.map(str::to_string),
            status: Payment::initial_status(method),
            payment_date: None,
            retry_count: 0,
            gateway_response: None,
            failure_reason: None,
            refund_status: RefundStatus::None,
            refund_amount_cents: None,
            refund_reason: None,
            refund_date: None,
            created_at: now,
            updated_at: now,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO payments (
                id, order_id, user_id, transaction_id, amount_cents, method, gateway,
                status, retry_count, refund_status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?10)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.order_id)
        .bind(&payment.user_id)
        .bind(&payment.transaction_id)
        .bind(payment.amount_cents)
        .bind(payment.method)
        .bind(&payment.gateway)
        .bind(payment.status)
        .bind(payment.refund_status)
        .bind(now)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            return Err(match DbError::from(e) {
                // The partial index reports under its own name.
                DbError::UniqueViolation { field, .. }
                    if field.contains("one_active_per_order") =>
                {
                    DbError::Core(CoreError::DuplicateEntity {
                        entity: "Payment",
                        key: order_id.to_string(),
                    })
                }
                other => other,
            });
        }

        debug!(
            order_id = %order_id,
            transaction_id = %payment.transaction_id,
            status = %payment.status,
            "Payment opened"
        );
        Ok(payment)
    }

    /// Persists state moves made on a loaded copy.
    ///
    /// `previous_status` and `previous_refund` are what the copy was loaded
    /// with; the UPDATE only lands while the row still carries both.
    ///
    /// ## Errors
    /// `InvalidTransition` when the payment status raced, `InvalidRefund`
    /// when the refund sub-state raced, `NotFound` when the row is gone.
    pub async fn persist(
        &self,
        payment: &Payment,
        previous_status: PaymentStatus,
        previous_refund: RefundStatus,
        notifications: &[NewNotification],
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE payments SET
                status = ?4,
                payment_date = ?5,
                retry_count = ?6,
                gateway_response = ?7,
                failure_reason = ?8,
                refund_status = ?9,
                refund_amount_cents = ?10,
                refund_reason = ?11,
                refund_date = ?12,
                updated_at = ?13
            WHERE id = ?1 AND status = ?2 AND refund_status = ?3
            "#,
        )
        .bind(&payment.id)
        .bind(previous_status)
        .bind(previous_refund)
        .bind(payment.status)
        .bind(payment.payment_date)
        .bind(payment.retry_count)
        .bind(&payment.gateway_response)
        .bind(&payment.failure_reason)
        .bind(payment.refund_status)
        .bind(payment.refund_amount_cents)
        .bind(&payment.refund_reason)
        .bind(payment.refund_date)
        .bind(payment.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .stale_copy(&mut tx, payment, previous_status)
                .await);
        }

        for notification in notifications {
            insert_notification(&mut tx, notification, payment.updated_at).await?;
        }

        tx.commit().await?;

        debug!(
            payment_id = %payment.id,
            status = %payment.status,
            refund_status = %payment.refund_status,
            "Payment persisted"
        );
        Ok(())
    }

    /// Classifies a failed guarded write by re-reading the row.
    async fn stale_copy(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        payment: &Payment,
        previous_status: PaymentStatus,
    ) -> DbError {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM payments WHERE id = ?1");
        let fresh = sqlx::query_as::<_, Payment>(&sql)
            .bind(&payment.id)
            .fetch_optional(&mut **tx)
            .await;

        match fresh {
            Ok(Some(row)) if row.status != previous_status => {
                DbError::Core(CoreError::invalid_transition(
                    "Payment",
                    &payment.id,
                    row.status.to_string(),
                    format!("transition to {}", payment.status),
                ))
            }
            Ok(Some(row)) => DbError::Core(CoreError::invalid_refund(format!(
                "refund moved to {} concurrently",
                row.refund_status
            ))),
            Ok(None) => DbError::not_found("Payment", &payment.id),
            Err(e) => e.into(),
        }
    }
}

/// Mints a gateway-facing transaction reference.
fn generate_transaction_id() -> String {
    let timestamp = Utc::now().timestamp_millis();
    let uuid = Uuid::new_v4().simple().to_string();
    format!("TXN-{}-{}", timestamp, uuid[..6].to_uppercase())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::order::{NewOrder, NewOrderLine};
    use meridian_core::{Money, Order, OrderTotals, ShippingAddress};

    async fn seeded_order(db: &Database) -> Order {
        let new = NewOrder {
            user_id: "user-1".to_string(),
            payment_method: PaymentMethod::Card,
            coupon_code: None,
            totals: OrderTotals::compute(
                Money::from_cents(10_000),
                Money::zero(),
                Money::from_cents(1_500),
                Money::from_cents(1_000),
            ),
            shipping: ShippingAddress {
                address: "1 Main St".to_string(),
                city: "Springfield".to_string(),
                postal_code: "12345".to_string(),
                country: "US".to_string(),
            },
            lines: vec![NewOrderLine {
                product_id: "p-1".to_string(),
                name: "Widget".to_string(),
                quantity: 1,
                unit_price_cents: 10_000,
            }],
        };
        db.orders().create(new, &[]).await.unwrap()
    }

    #[tokio::test]
    async fn test_initial_status_follows_method() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let order = seeded_order(&db).await;
        let repo = db.payments();

        let card = repo
            .create(&order.id, "user-1", 12_500, PaymentMethod::Card, Some("stripe"))
            .await
            .unwrap();
        assert_eq!(card.status, PaymentStatus::Processing);
        assert!(card.transaction_id.starts_with("TXN-"));

        let order2 = seeded_order(&db).await;
        let cash = repo
            .create(&order2.id, "user-1", 12_500, PaymentMethod::CashOnDelivery, None)
            .await
            .unwrap();
        assert_eq!(cash.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_one_live_payment_per_order() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let order = seeded_order(&db).await;
        let repo = db.payments();

        let first = repo
            .create(&order.id, "user-1", 12_500, PaymentMethod::Card, None)
            .await
            .unwrap();

        let err = repo
            .create(&order.id, "user-1", 12_500, PaymentMethod::Card, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Core(CoreError::DuplicateEntity { entity: "Payment", .. })
        ));

        // A dead attempt releases the slot.
        let mut payment = repo.get_by_id(&first.id).await.unwrap().unwrap();
        payment.mark_failed("card declined", Utc::now()).unwrap();
        repo.persist(&payment, PaymentStatus::Processing, RefundStatus::None, &[])
            .await
            .unwrap();

        let second = repo
            .create(&order.id, "user-1", 12_500, PaymentMethod::Paypal, None)
            .await
            .unwrap();
        assert_eq!(
            repo.get_active_for_order(&order.id).await.unwrap().unwrap().id,
            second.id
        );
        assert_eq!(repo.list_for_order(&order.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_retry_cycle() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let order = seeded_order(&db).await;
        let repo = db.payments();
        let created = repo
            .create(&order.id, "user-1", 12_500, PaymentMethod::Card, None)
            .await
            .unwrap();

        let mut payment = repo.get_by_id(&created.id).await.unwrap().unwrap();
        payment.mark_failed("card declined", Utc::now()).unwrap();
        repo.persist(&payment, PaymentStatus::Processing, RefundStatus::None, &[])
            .await
            .unwrap();

        payment.retry(Utc::now()).unwrap();
        repo.persist(&payment, PaymentStatus::Failed, RefundStatus::None, &[])
            .await
            .unwrap();

        payment.mark_failed("insufficient funds", Utc::now()).unwrap();
        repo.persist(&payment, PaymentStatus::Processing, RefundStatus::None, &[])
            .await
            .unwrap();

        let loaded = repo.get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PaymentStatus::Failed);
        assert_eq!(loaded.retry_count, 2);
        assert_eq!(loaded.failure_reason.as_deref(), Some("insufficient funds"));
    }

    #[tokio::test]
    async fn test_refund_lifecycle_persists() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let order = seeded_order(&db).await;
        let repo = db.payments();
        let created = repo
            .create(&order.id, "user-1", 12_500, PaymentMethod::Card, None)
            .await
            .unwrap();

        let mut payment = repo.get_by_id(&created.id).await.unwrap().unwrap();
        payment.mark_success(None, Utc::now()).unwrap();
        repo.persist(&payment, PaymentStatus::Processing, RefundStatus::None, &[])
            .await
            .unwrap();

        payment.request_refund(10_000, "damaged item", Utc::now()).unwrap();
        repo.persist(&payment, PaymentStatus::Success, RefundStatus::None, &[])
            .await
            .unwrap();
        assert_eq!(repo.list_open_refunds().await.unwrap().len(), 1);

        payment.advance_refund(RefundStatus::Processing, Utc::now()).unwrap();
        repo.persist(&payment, PaymentStatus::Success, RefundStatus::Requested, &[])
            .await
            .unwrap();

        payment.advance_refund(RefundStatus::Completed, Utc::now()).unwrap();
        repo.persist(&payment, PaymentStatus::Success, RefundStatus::Processing, &[])
            .await
            .unwrap();

        let loaded = repo.get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PaymentStatus::Refunded);
        assert_eq!(loaded.refund_status, RefundStatus::Completed);
        assert_eq!(loaded.refund_amount_cents, Some(10_000));
        assert!(loaded.refund_date.is_some());
        assert!(repo.list_open_refunds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_status_copy_loses() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let order = seeded_order(&db).await;
        let repo = db.payments();
        let created = repo
            .create(&order.id, "user-1", 12_500, PaymentMethod::Card, None)
            .await
            .unwrap();

        let mut copy_a = repo.get_by_id(&created.id).await.unwrap().unwrap();
        let mut copy_b = repo.get_by_id(&created.id).await.unwrap().unwrap();

        copy_a.mark_success(None, Utc::now()).unwrap();
        repo.persist(&copy_a, PaymentStatus::Processing, RefundStatus::None, &[])
            .await
            .unwrap();

        copy_b.mark_failed("late to the party", Utc::now()).unwrap();
        let err = repo
            .persist(&copy_b, PaymentStatus::Processing, RefundStatus::None, &[])
            .await
            .unwrap_err();
        match err {
            DbError::Core(CoreError::InvalidTransition { current, .. }) => {
                assert_eq!(current, "success");
            }
            other => panic!("expected InvalidTransition, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_stale_refund_copy_loses() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let order = seeded_order(&db).await;
        let repo = db.payments();
        let created = repo
            .create(&order.id, "user-1", 12_500, PaymentMethod::Card, None)
            .await
            .unwrap();

        let mut payment = repo.get_by_id(&created.id).await.unwrap().unwrap();
        payment.mark_success(None, Utc::now()).unwrap();
        repo.persist(&payment, PaymentStatus::Processing, RefundStatus::None, &[])
            .await
            .unwrap();
        payment.request_refund(5_000, "late delivery", Utc::now()).unwrap();
        repo.persist(&payment, PaymentStatus::Success, RefundStatus::None, &[])
            .await
            .unwrap();

        // Two admins pick up the same request.
        let mut admin_a = repo.get_by_id(&created.id).await.unwrap().unwrap();
        let mut admin_b = repo.get_by_id(&created.id).await.unwrap().unwrap();

        admin_a.advance_refund(RefundStatus::Processing, Utc::now()).unwrap();
        repo.persist(&admin_a, PaymentStatus::Success, RefundStatus::Requested, &[])
            .await
            .unwrap();

        admin_b.advance_refund(RefundStatus::Rejected, Utc::now()).unwrap();
        let err = repo
            .persist(&admin_b, PaymentStatus::Success, RefundStatus::Requested, &[])
            .await
            .unwrap_err();
        match err {
            DbError::Core(CoreError::InvalidRefund { reason }) => {
                assert!(reason.contains("processing"));
            }
            other => panic!("expected InvalidRefund, got {other}"),
        }
    }
}
