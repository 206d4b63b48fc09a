//! # Delivery Repository
//!
//! Fulfilment records, their append-only event history, and the cascade
//! onto the order row.
//!
//! ## Status Change Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  persist_status_change                                                  │
//! │      ├── UPDATE deliveries        (the full mutable row)                │
//! │      ├── INSERT delivery_events   (history line for this change)        │
//! │      ├── UPDATE orders            (only when the change cascades)       │
//! │      └── INSERT notifications     (outbox)                              │
//! │                          one transaction                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The delivery UPDATE carries no status guard. Dispatchers may set any
//! status from any status, so there is no stale-copy hazard worth guarding
//! against; the courier scan is the ground truth and the history records
//! every write in order.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::notification::insert_notification;
use meridian_core::{
    CoreError, Delivery, DeliveryEvent, DeliveryStatus, NewNotification, Order,
};

const SELECT_COLUMNS: &str = "id, order_id, tracking_number, status, courier_id, courier_name, \
     current_location, estimated_delivery, pickup_time, actual_delivery_time, \
     delivery_attempts, failure_reason, return_reason, \
     proof_photo, proof_signature, proof_received_by, \
     rating, feedback, created_at, updated_at";

/// Repository for delivery database operations.
#[derive(Debug, Clone)]
pub struct DeliveryRepository {
    pool: SqlitePool,
}

impl DeliveryRepository {
    /// Creates a new DeliveryRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DeliveryRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Gets a delivery by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Delivery>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM deliveries WHERE id = ?1");
        let delivery = sqlx::query_as::<_, Delivery>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(delivery)
    }

    /// The delivery for an order. One per order at most.
    pub async fn get_by_order(&self, order_id: &str) -> DbResult<Option<Delivery>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM deliveries WHERE order_id = ?1");
        let delivery = sqlx::query_as::<_, Delivery>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(delivery)
    }

    /// Public tracking lookup.
    pub async fn get_by_tracking(&self, tracking_number: &str) -> DbResult<Option<Delivery>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM deliveries WHERE tracking_number = ?1");
        let delivery = sqlx::query_as::<_, Delivery>(&sql)
            .bind(tracking_number)
            .fetch_optional(&self.pool)
            .await?;
        Ok(delivery)
    }

    /// Status history, oldest first.
    pub async fn get_events(&self, delivery_id: &str) -> DbResult<Vec<DeliveryEvent>> {
        let events = sqlx::query_as::<_, DeliveryEvent>(
            "SELECT id, delivery_id, status, remarks, location, created_at \
             FROM delivery_events WHERE delivery_id = ?1 ORDER BY created_at, id",
        )
        .bind(delivery_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    /// Deliveries currently in a given status, oldest first.
    pub async fn list_by_status(&self, status: DeliveryStatus) -> DbResult<Vec<Delivery>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM deliveries WHERE status = ?1 ORDER BY created_at ASC"
        );
        let deliveries = sqlx::query_as::<_, Delivery>(&sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
        Ok(deliveries)
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Creates the delivery for an order and seeds the first history line.
    ///
    /// ## Errors
    /// `DuplicateEntity` when the order already has a delivery.
    pub async fn create(
        &self,
        order_id: &str,
        estimated_delivery: Option<DateTime<Utc>>,
    ) -> DbResult<Delivery> {
        let now = Utc::now();
        let delivery = Delivery {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            tracking_number: generate_tracking_number(),
            status: DeliveryStatus::Pending,
            courier_id: None,
            courier_name: None,
            current_location: None,
            estimated_delivery,
            pickup_time: None,
            actual_delivery_time: None,
            delivery_attempts: 0,
            failure_reason: None,
            return_reason: None,
            proof_photo: None,
            proof_signature: None,
            proof_received_by: None,
            rating: None,
            feedback: None,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO deliveries (
                id, order_id, tracking_number, status, estimated_delivery,
                delivery_attempts, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)
            "#,
        )
        .bind(&delivery.id)
        .bind(&delivery.order_id)
        .bind(&delivery.tracking_number)
        .bind(delivery.status)
        .bind(delivery.estimated_delivery)
        .bind(now)
        .execute(&mut *tx)
        .await;

        if let Err(e) = result {
            return Err(match DbError::from(e) {
                DbError::UniqueViolation { field, .. } if field.ends_with("order_id") => {
                    DbError::Core(CoreError::DuplicateEntity {
                        entity: "Delivery",
                        key: order_id.to_string(),
                    })
                }
                other => other,
            });
        }

        insert_event(&mut tx, &delivery.id, delivery.status, Some("Delivery created"), None, now)
            .await?;

        tx.commit().await?;

        debug!(
            order_id = %order_id,
            tracking_number = %delivery.tracking_number,
            "Delivery created"
        );
        Ok(delivery)
    }

    /// Persists a status change made on a loaded copy, appends the matching
    /// history line, and applies the order cascade when one fired.
    ///
    /// `order_cascade` is the order as the caller mutated it (shipped or
    /// delivered); its row is rewritten unconditionally because the courier
    /// scan outranks whatever state the order sat in.
    pub async fn persist_status_change(
        &self,
        delivery: &Delivery,
        remarks: Option<&str>,
        location: Option<&str>,
        order_cascade: Option<&Order>,
        notifications: &[NewNotification],
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let rows = write_row(&mut tx, delivery).await?;
        if rows == 0 {
            return Err(DbError::not_found("Delivery", &delivery.id));
        }

        insert_event(
            &mut tx,
            &delivery.id,
            delivery.status,
            remarks,
            location,
            delivery.updated_at,
        )
        .await?;

        if let Some(order) = order_cascade {
            sqlx::query(
                r#"
                UPDATE orders SET
                    status = ?2,
                    is_delivered = ?3,
                    delivered_at = ?4,
                    updated_at = ?5
                WHERE id = ?1
                "#,
            )
            .bind(&order.id)
            .bind(order.status)
            .bind(order.is_delivered)
            .bind(order.delivered_at)
            .bind(order.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        for notification in notifications {
            insert_notification(&mut tx, notification, delivery.updated_at).await?;
        }

        tx.commit().await?;

        debug!(
            delivery_id = %delivery.id,
            status = %delivery.status,
            cascade = order_cascade.is_some(),
            "Delivery status persisted"
        );
        Ok(())
    }

    /// Persists field changes that are not status moves: proof of delivery
    /// and ratings. No history line is written.
    pub async fn persist_fields(&self, delivery: &Delivery) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        let rows = write_row(&mut tx, delivery).await?;
        if rows == 0 {
            return Err(DbError::not_found("Delivery", &delivery.id));
        }
        tx.commit().await?;
        Ok(())
    }
}

/// Rewrites every mutable column of a delivery row. Identity columns
/// (order, tracking number) never change after creation.
async fn write_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    delivery: &Delivery,
) -> DbResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE deliveries SET
            status = ?2,
            courier_id = ?3,
            courier_name = ?4,
            current_location = ?5,
            estimated_delivery = ?6,
            pickup_time = ?7,
            actual_delivery_time = ?8,
            delivery_attempts = ?9,
            failure_reason = ?10,
            return_reason = ?11,
            proof_photo = ?12,
            proof_signature = ?13,
            proof_received_by = ?14,
            rating = ?15,
            feedback = ?16,
            updated_at = ?17
        WHERE id = ?1
        "#,
    )
    .bind(&delivery.id)
    .bind(delivery.status)
    .bind(&delivery.courier_id)
    .bind(&delivery.courier_name)
    .bind(&delivery.current_location)
    .bind(delivery.estimated_delivery)
    .bind(delivery.pickup_time)
    .bind(delivery.actual_delivery_time)
    .bind(delivery.delivery_attempts)
    .bind(&delivery.failure_reason)
    .bind(&delivery.return_reason)
    .bind(&delivery.proof_photo)
    .bind(&delivery.proof_signature)
    .bind(&delivery.proof_received_by)
    .bind(delivery.rating)
    .bind(&delivery.feedback)
    .bind(delivery.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

async fn insert_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    delivery_id: &str,
    status: DeliveryStatus,
    remarks: Option<&str>,
    location: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO delivery_events (id, delivery_id, status, remarks, location, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(delivery_id)
    .bind(status)
    .bind(remarks)
    .bind(location)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Mints a customer-facing tracking number.
fn generate_tracking_number() -> String {
    let timestamp = Utc::now().timestamp_millis();
    let uuid = Uuid::new_v4().simple().to_string();
    format!("TRK{}{}", timestamp, uuid[..6].to_uppercase())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::order::{NewOrder, NewOrderLine};
    use meridian_core::{Money, OrderStatus, OrderTotals, PaymentMethod, ShippingAddress};

    async fn seeded_order(db: &Database) -> Order {
        let new = NewOrder {
            user_id: "user-1".to_string(),
            payment_method: PaymentMethod::Card,
            coupon_code: None,
            totals: OrderTotals::compute(
                Money::from_cents(5_000),
                Money::zero(),
                Money::from_cents(750),
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
                quantity: 2,
                unit_price_cents: 2_500,
            }],
        };
        db.orders().create(new, &[]).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_seeds_history() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let order = seeded_order(&db).await;

        let delivery = db.deliveries().create(&order.id, None).await.unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert!(delivery.tracking_number.starts_with("TRK"));
        assert!(!delivery.tracking_number.contains('-'));

        let events = db.deliveries().get_events(&delivery.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, DeliveryStatus::Pending);

        let by_tracking = db
            .deliveries()
            .get_by_tracking(&delivery.tracking_number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_tracking.id, delivery.id);
    }

    #[tokio::test]
    async fn test_one_delivery_per_order() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let order = seeded_order(&db).await;

        db.deliveries().create(&order.id, None).await.unwrap();
        let err = db.deliveries().create(&order.id, None).await.unwrap_err();
        match err {
            DbError::Core(CoreError::DuplicateEntity { entity, key }) => {
                assert_eq!(entity, "Delivery");
                assert_eq!(key, order.id);
            }
            other => panic!("expected DuplicateEntity, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_status_changes_append_history() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let order = seeded_order(&db).await;
        let repo = db.deliveries();
        let created = repo.create(&order.id, None).await.unwrap();

        let mut delivery = repo.get_by_id(&created.id).await.unwrap().unwrap();
        delivery.assign_courier("courier-7", "Sam", Utc::now());
        delivery.apply_status(
            DeliveryStatus::Assigned,
            Some("Assigned to Sam"),
            None,
            Utc::now(),
        );
        repo.persist_status_change(&delivery, Some("Assigned to Sam"), None, None, &[])
            .await
            .unwrap();

        delivery.apply_status(
            DeliveryStatus::PickedUp,
            None,
            Some("Depot 4"),
            Utc::now(),
        );
        repo.persist_status_change(&delivery, None, Some("Depot 4"), None, &[])
            .await
            .unwrap();

        let loaded = repo.get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DeliveryStatus::PickedUp);
        assert_eq!(loaded.courier_name.as_deref(), Some("Sam"));
        assert_eq!(loaded.current_location.as_deref(), Some("Depot 4"));
        assert!(loaded.pickup_time.is_some());

        let events = repo.get_events(&created.id).await.unwrap();
        assert_eq!(events.len(), 3); // created + assigned + picked_up
        assert_eq!(events[1].remarks.as_deref(), Some("Assigned to Sam"));
        assert_eq!(events[2].location.as_deref(), Some("Depot 4"));
    }

    #[tokio::test]
    async fn test_pickup_time_survives_a_second_pass() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let order = seeded_order(&db).await;
        let repo = db.deliveries();
        let created = repo.create(&order.id, None).await.unwrap();

        let mut delivery = repo.get_by_id(&created.id).await.unwrap().unwrap();
        delivery.apply_status(DeliveryStatus::PickedUp, None, None, Utc::now());
        repo.persist_status_change(&delivery, None, None, None, &[]).await.unwrap();
        let first = repo.get_by_id(&created.id).await.unwrap().unwrap().pickup_time;

        // Bounce away and back; the stamp must not move.
        let mut delivery = repo.get_by_id(&created.id).await.unwrap().unwrap();
        delivery.apply_status(DeliveryStatus::InTransit, None, None, Utc::now());
        repo.persist_status_change(&delivery, None, None, None, &[]).await.unwrap();
        delivery.apply_status(
            DeliveryStatus::PickedUp,
            None,
            None,
            Utc::now() + chrono::Duration::hours(1),
        );
        repo.persist_status_change(&delivery, None, None, None, &[]).await.unwrap();

        let second = repo.get_by_id(&created.id).await.unwrap().unwrap().pickup_time;
        assert_eq!(first, second);
        assert!(first.is_some());
    }

    #[tokio::test]
    async fn test_cascade_rewrites_the_order() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let order = seeded_order(&db).await;
        let repo = db.deliveries();
        let created = repo.create(&order.id, None).await.unwrap();

        // Out for delivery: the order becomes shipped.
        let mut delivery = repo.get_by_id(&created.id).await.unwrap().unwrap();
        let now = Utc::now();
        let transition = delivery.apply_status(DeliveryStatus::OutForDelivery, None, None, now);
        assert!(transition.cascade.is_some());

        let mut order_copy = db.orders().get_by_id(&order.id).await.unwrap().unwrap();
        order_copy.mark_shipped(now);
        repo.persist_status_change(&delivery, None, None, Some(&order_copy), &[])
            .await
            .unwrap();

        let loaded = db.orders().get_by_id(&order.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, OrderStatus::Shipped);
        assert!(!loaded.is_delivered);

        // Delivered: the order follows, flag and timestamp included.
        let now = Utc::now();
        delivery.apply_status(DeliveryStatus::Delivered, None, None, now);
        let mut order_copy = db.orders().get_by_id(&order.id).await.unwrap().unwrap();
        order_copy.mark_delivered(now);
        repo.persist_status_change(&delivery, None, None, Some(&order_copy), &[])
            .await
            .unwrap();

        let loaded = db.orders().get_by_id(&order.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, OrderStatus::Delivered);
        assert!(loaded.is_delivered);
        assert!(loaded.delivered_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_attempts_accumulate() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let order = seeded_order(&db).await;
        let repo = db.deliveries();
        let created = repo.create(&order.id, None).await.unwrap();

        let mut delivery = repo.get_by_id(&created.id).await.unwrap().unwrap();
        delivery.apply_status(DeliveryStatus::Failed, Some("nobody home"), None, Utc::now());
        repo.persist_status_change(&delivery, Some("nobody home"), None, None, &[])
            .await
            .unwrap();
        delivery.apply_status(DeliveryStatus::OutForDelivery, None, None, Utc::now());
        repo.persist_status_change(&delivery, None, None, None, &[]).await.unwrap();
        delivery.apply_status(DeliveryStatus::Failed, Some("refused"), None, Utc::now());
        repo.persist_status_change(&delivery, Some("refused"), None, None, &[])
            .await
            .unwrap();

        let loaded = repo.get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.delivery_attempts, 2);
        assert_eq!(loaded.failure_reason.as_deref(), Some("refused"));
        assert!(repo
            .list_by_status(DeliveryStatus::Failed)
            .await
            .unwrap()
            .iter()
            .any(|d| d.id == created.id));
    }

    #[tokio::test]
    async fn test_rating_and_proof_persist_without_history() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let order = seeded_order(&db).await;
        let repo = db.deliveries();
        let created = repo.create(&order.id, None).await.unwrap();

        let mut delivery = repo.get_by_id(&created.id).await.unwrap().unwrap();
        delivery.apply_status(DeliveryStatus::Delivered, None, None, Utc::now());
        repo.persist_status_change(&delivery, None, None, None, &[]).await.unwrap();
        let history_before = repo.get_events(&created.id).await.unwrap().len();

        delivery.record_proof(
            None,
            Some("sig-data".to_string()),
            Some("J. Doe".to_string()),
            Utc::now(),
        );
        delivery.rate(4, Some("left at door".to_string()), Utc::now()).unwrap();
        repo.persist_fields(&delivery).await.unwrap();

        let loaded = repo.get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.rating, Some(4));
        assert_eq!(loaded.feedback.as_deref(), Some("left at door"));
        assert_eq!(loaded.proof_received_by.as_deref(), Some("J. Doe"));
        assert_eq!(repo.get_events(&created.id).await.unwrap().len(), history_before);
    }
}
