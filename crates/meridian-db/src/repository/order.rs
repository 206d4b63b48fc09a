//! # Order Repository
//!
//! Order storage with price-snapshotted lines.
//!
//! ## Write Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  create              header + items + notifications, one transaction    │
//! │                                                                         │
//! │  persist_status      guarded: WHERE status = <status we loaded>         │
//! │                      a raced admin edit loses cleanly instead of        │
//! │                      silently overwriting the newer state               │
//! │                                                                         │
//! │  persist_cancellation  guarded: WHERE is_delivered = 0                  │
//! │                        AND status != 'delivered'                        │
//! │                                                                         │
//! │  persist_paid        unguarded: payment truth is independent of the     │
//! │                      status field and always lands                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Status math lives on `meridian_core::Order`; callers load, mutate, then
//! persist. The WHERE guards only exist to catch the copy going stale
//! between the load and the write. Delivery cascades do not come through
//! here; the delivery repository updates the order row in its own
//! transaction so the cascade and the delivery event commit together.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::notification::insert_notification;
use meridian_core::validation::{validate_order_items_count, validate_quantity};
use meridian_core::{
    items_total, CoreError, NewNotification, Order, OrderItem, OrderStatus, OrderTotals,
    PaymentMethod, ShippingAddress, ValidationError,
};

const SELECT_COLUMNS: &str = "id, user_id, status, payment_method, coupon_code, \
     items_price_cents, discount_cents, tax_cents, shipping_cents, total_cents, \
     ship_address, ship_city, ship_postal_code, ship_country, \
     is_paid, paid_at, gateway_reference, payer_email, \
     is_delivered, delivered_at, created_at, updated_at";

/// One line of an order being placed. Name and unit price are the caller's
/// snapshot of the product at checkout time.
#[derive(Debug, Clone)]
pub struct NewOrderLine {
    pub product_id: String,
    pub name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

/// Input for creating an order. The repository mints IDs and timestamps.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: String,
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<String>,
    pub totals: OrderTotals,
    pub shipping: ShippingAddress,
    pub lines: Vec<NewOrderLine>,
}

/// Repository for order database operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Gets an order by ID, items included.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM orders WHERE id = ?1");
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match order {
            Some(mut order) => {
                order.items = self.items_for(&order.id).await?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    /// A user's orders, newest first.
    pub async fn list_for_user(&self, user_id: &str) -> DbResult<Vec<Order>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM orders WHERE user_id = ?1 ORDER BY created_at DESC"
        );
        let mut orders = sqlx::query_as::<_, Order>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        for order in &mut orders {
            order.items = self.items_for(&order.id).await?;
        }
        Ok(orders)
    }

    /// Orders in a given state, oldest first, for fulfilment queues.
    pub async fn list_by_status(&self, status: OrderStatus) -> DbResult<Vec<Order>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM orders WHERE status = ?1 ORDER BY created_at ASC"
        );
        let mut orders = sqlx::query_as::<_, Order>(&sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
        for order in &mut orders {
            order.items = self.items_for(&order.id).await?;
        }
        Ok(orders)
    }

    async fn items_for(&self, order_id: &str) -> DbResult<Vec<OrderItem>> {
        let items = sqlx::query_as::<_, OrderItem>(
            "SELECT id, order_id, product_id, name, quantity, unit_price_cents, created_at \
             FROM order_items WHERE order_id = ?1 ORDER BY created_at, id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Creates an order with its lines. Everything, the triggered
    /// notifications included, commits in one transaction.
    pub async fn create(
        &self,
        new: NewOrder,
        notifications: &[NewNotification],
    ) -> DbResult<Order> {
        validate_order_items_count(new.lines.len()).map_err(CoreError::from)?;
        for line in &new.lines {
            validate_quantity(line.quantity).map_err(CoreError::from)?;
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4().to_string();

        let items: Vec<OrderItem> = new
            .lines
            .into_iter()
            .map(|line| OrderItem {
                id: Uuid::new_v4().to_string(),
                order_id: order_id.clone(),
                product_id: line.product_id,
                name: line.name,
                quantity: line.quantity,
                unit_price_cents: line.unit_price_cents,
                created_at: now,
            })
            .collect();

        // The stated breakdown must reconcile with the snapshotted lines;
        // a drifted total would be unauditable later.
        let lines_total = items_total(&items);
        if lines_total != new.totals.items {
            return Err(CoreError::Validation(ValidationError::InvalidFormat {
                field: "totals.items".to_string(),
                reason: format!(
                    "stated {} does not match the line total {}",
                    new.totals.items, lines_total
                ),
            })
            .into());
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, user_id, status, payment_method, coupon_code,
                items_price_cents, discount_cents, tax_cents, shipping_cents, total_cents,
                ship_address, ship_city, ship_postal_code, ship_country,
                is_paid, is_delivered, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 0, 0, ?15, ?15)
            "#,
        )
        .bind(&order_id)
        .bind(&new.user_id)
        .bind(OrderStatus::Pending)
        .bind(new.payment_method)
        .bind(&new.coupon_code)
        .bind(new.totals.items.cents())
        .bind(new.totals.discount.cents())
        .bind(new.totals.tax.cents())
        .bind(new.totals.shipping.cents())
        .bind(new.totals.total.cents())
        .bind(&new.shipping.address)
        .bind(&new.shipping.city)
        .bind(&new.shipping.postal_code)
        .bind(&new.shipping.country)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for item in &items {
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    id, order_id, product_id, name, quantity, unit_price_cents, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&item.id)
            .bind(&item.order_id)
            .bind(&item.product_id)
            .bind(&item.name)
            .bind(item.quantity)
            .bind(item.unit_price_cents)
            .bind(item.created_at)
            .execute(&mut *tx)
            .await?;
        }

        // The order id is minted here, so creation notifications get it
        // stamped on rather than carrying one from the caller.
        for notification in notifications {
            let stamped = notification.clone().with_order(order_id.as_str());
            insert_notification(&mut tx, &stamped, now).await?;
        }

        tx.commit().await?;

        debug!(order_id = %order_id, user_id = %new.user_id, lines = items.len(), "Order created");

        Ok(Order {
            id: order_id,
            user_id: new.user_id,
            status: OrderStatus::Pending,
            payment_method: new.payment_method,
            coupon_code: new.coupon_code,
            items_price_cents: new.totals.items.cents(),
            discount_cents: new.totals.discount.cents(),
            tax_cents: new.totals.tax.cents(),
            shipping_cents: new.totals.shipping.cents(),
            total_cents: new.totals.total.cents(),
            shipping: new.shipping,
            is_paid: false,
            paid_at: None,
            gateway_reference: None,
            payer_email: None,
            is_delivered: false,
            delivered_at: None,
            created_at: now,
            updated_at: now,
            items,
        })
    }

    /// Persists a status move made on a loaded copy.
    ///
    /// `previous` is the status the copy was loaded with; the UPDATE only
    /// lands while the row still carries it.
    ///
    /// ## Errors
    /// `InvalidTransition` naming the row's live status when the guard
    /// fails, `NotFound` when the order is gone.
    pub async fn persist_status(
        &self,
        order: &Order,
        previous: OrderStatus,
        notifications: &[NewNotification],
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders SET
                status = ?3,
                is_delivered = ?4,
                delivered_at = ?5,
                updated_at = ?6
            WHERE id = ?1 AND status = ?2
            "#,
        )
        .bind(&order.id)
        .bind(previous)
        .bind(order.status)
        .bind(order.is_delivered)
        .bind(order.delivered_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.stale_copy(&mut tx, order).await);
        }

        for notification in notifications {
            insert_notification(&mut tx, notification, order.updated_at).await?;
        }

        tx.commit().await?;
        debug!(order_id = %order.id, status = %order.status, "Order status persisted");
        Ok(())
    }

    /// Persists a cancellation. The guard re-checks the one rule that must
    /// hold at write time: a delivered order cannot be cancelled.
    pub async fn persist_cancellation(
        &self,
        order: &Order,
        notifications: &[NewNotification],
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders SET
                status = 'cancelled',
                updated_at = ?2
            WHERE id = ?1 AND is_delivered = 0 AND status != 'delivered'
            "#,
        )
        .bind(&order.id)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.stale_copy(&mut tx, order).await);
        }

        for notification in notifications {
            insert_notification(&mut tx, notification, order.updated_at).await?;
        }

        tx.commit().await?;
        debug!(order_id = %order.id, "Order cancelled");
        Ok(())
    }

    /// Persists payment facts onto the order row. No status guard: whether
    /// the charge landed does not depend on where the order sits in its
    /// lifecycle.
    pub async fn persist_paid(
        &self,
        order: &Order,
        notifications: &[NewNotification],
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders SET
                is_paid = ?2,
                paid_at = ?3,
                gateway_reference = ?4,
                payer_email = ?5,
                updated_at = ?6
            WHERE id = ?1
            "#,
        )
        .bind(&order.id)
        .bind(order.is_paid)
        .bind(order.paid_at)
        .bind(&order.gateway_reference)
        .bind(&order.payer_email)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Order", &order.id));
        }

        for notification in notifications {
            insert_notification(&mut tx, notification, order.updated_at).await?;
        }

        tx.commit().await?;
        debug!(order_id = %order.id, is_paid = order.is_paid, "Order payment flags persisted");
        Ok(())
    }

    /// Classifies a failed guarded write by re-reading the row.
    async fn stale_copy(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        order: &Order,
    ) -> DbError {
        let fresh: Result<Option<OrderStatus>, sqlx::Error> =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = ?1")
                .bind(&order.id)
                .fetch_optional(&mut **tx)
                .await;

        match fresh {
            Ok(Some(current)) => DbError::Core(CoreError::invalid_transition(
                "Order",
                &order.id,
                current.to_string(),
                format!("transition to {}", order.status),
            )),
            Ok(None) => DbError::not_found("Order", &order.id),
            Err(e) => e.into(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
