//! # Fulfilment Service
//!
//! Delivery tracking from dispatch to doorstep, and the cascades that keep
//! the order row in step with the parcel.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Who Moves a Parcel                                │
//! │                                                                         │
//! │  admin              creates the delivery, assigns the courier,          │
//! │                     and can set any status                              │
//! │  assigned courier   progresses their own parcels                        │
//! │  customer           tracks, and rates once delivered                    │
//! │                                                                         │
//! │  Cascades:                                                              │
//! │    out_for_delivery  → order becomes shipped                            │
//! │    delivered         → order becomes delivered                          │
//! │                                                                         │
//! │  Every status change notifies the order's customer.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Status moves are deliberately unrestricted; dispatchers fix mislabelled
//! parcels by setting the true status directly. Moves that pull a parcel
//! out of a terminal state are logged, not refused.

use chrono::{DateTime, Utc};
use meridian_core::{
    Actor, CoreError, Delivery, DeliveryCascade, DeliveryEvent, DeliveryStatus, NewNotification,
    NotificationKind, NotificationPriority, Order, OrderStatus,
};
use meridian_db::Database;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::EngineResult;

/// Delivery operations for one store's parcels.
pub struct FulfillmentService {
    db: Arc<Database>,
}

impl FulfillmentService {
    pub fn new(db: Arc<Database>) -> Self {
        FulfillmentService { db }
    }

    // -------------------------------------------------------------------------
    // Setup
    // -------------------------------------------------------------------------

    /// Opens the delivery for an order and mints its tracking number.
    ///
    /// ## Errors
    /// - `Unauthorized` for non-admins
    /// - `NotFound` for an unknown order
    /// - `InvalidTransition` for a cancelled order
    /// - `DuplicateEntity` when the order already has a delivery
    pub async fn create_delivery(
        &self,
        actor: &Actor,
        order_id: &str,
        estimated_delivery: Option<DateTime<Utc>>,
    ) -> EngineResult<Delivery> {
        actor.require_admin("create a delivery")?;
        let order = self.require_order(order_id).await?;
        if order.status == OrderStatus::Cancelled {
            return Err(CoreError::invalid_transition(
                "Order",
                order_id,
                order.status.to_string(),
                "create a delivery",
            )
            .into());
        }

        let delivery = self.db.deliveries().create(order_id, estimated_delivery).await?;
        info!(
            order_id,
            delivery_id = %delivery.id,
            tracking_number = %delivery.tracking_number,
            "Delivery created"
        );
        Ok(delivery)
    }

    /// Puts a courier on the parcel and moves it to `assigned`.
    pub async fn assign_courier(
        &self,
        actor: &Actor,
        delivery_id: &str,
        courier_id: &str,
        courier_name: &str,
    ) -> EngineResult<Delivery> {
        actor.require_admin("assign a courier")?;
        let mut delivery = self.require_delivery(delivery_id).await?;
        let order = self.require_order(&delivery.order_id).await?;

        let now = Utc::now();
        delivery.assign_courier(courier_id, courier_name, now);
        let remark = format!("Assigned to {courier_name}");
        delivery.apply_status(DeliveryStatus::Assigned, Some(&remark), None, now);

        let note = NewNotification::new(
            &order.user_id,
            NotificationKind::DeliveryUpdate,
            "Delivery update",
            format!(
                "Your order is with our courier. Track it with {}.",
                delivery.tracking_number
            ),
        )
        .with_order(order.id.as_str());

        self.db
            .deliveries()
            .persist_status_change(&delivery, Some(&remark), None, None, &[note])
            .await?;

        info!(
            delivery_id = %delivery.id,
            courier_id,
            "Courier assigned"
        );
        Ok(delivery)
    }

    // -------------------------------------------------------------------------
    // Progress
    // -------------------------------------------------------------------------

    /// Records a status scan from the courier or a dispatcher.
    ///
    /// Cascades onto the order when the parcel goes out for delivery
    /// (order becomes shipped) or arrives (order becomes delivered). The
    /// customer is notified on every change.
    ///
    /// ## Errors
    /// `Unauthorized` unless the actor is an admin or the courier assigned
    /// to this parcel.
    pub async fn update_status(
        &self,
        actor: &Actor,
        delivery_id: &str,
        next: DeliveryStatus,
        remarks: Option<&str>,
        location: Option<&str>,
    ) -> EngineResult<Delivery> {
        let mut delivery = self.require_delivery(delivery_id).await?;
        authorize_progress(actor, &delivery)?;
        let mut order = self.require_order(&delivery.order_id).await?;

        let now = Utc::now();
        let transition = delivery.apply_status(next, remarks, location, now);
        if transition.left_terminal {
            warn!(
                delivery_id = %delivery.id,
                from = %transition.previous,
                to = %next,
                "Parcel pulled out of a terminal state"
            );
        }

        let cascaded = match transition.cascade {
            Some(DeliveryCascade::OrderShipped) => {
                let previous = order.mark_shipped(now);
                if matches!(previous, OrderStatus::Cancelled | OrderStatus::Delivered) {
                    warn!(
                        order_id = %order.id,
                        from = %previous,
                        "Delivery cascade overrode a settled order"
                    );
                }
                true
            }
            Some(DeliveryCascade::OrderDelivered) => {
                let previous = order.mark_delivered(now);
                if previous == OrderStatus::Cancelled {
                    warn!(
                        order_id = %order.id,
                        "Delivery cascade overrode a cancelled order"
                    );
                }
                true
            }
            None => false,
        };

        let note = progress_notification(&order, &delivery, next);
        self.db
            .deliveries()
            .persist_status_change(
                &delivery,
                remarks,
                location,
                cascaded.then_some(&order),
                &[note],
            )
            .await?;

        info!(
            delivery_id = %delivery.id,
            from = %transition.previous,
            to = %next,
            cascaded,
            "Delivery status updated"
        );
        Ok(delivery)
    }

    /// Stores proof of delivery: photo, signature, receiver name.
    ///
    /// Pure field write; no history line, no cascade.
    pub async fn record_proof(
        &self,
        actor: &Actor,
        delivery_id: &str,
        photo: Option<String>,
        signature: Option<String>,
        received_by: Option<String>,
    ) -> EngineResult<Delivery> {
        let mut delivery = self.require_delivery(delivery_id).await?;
        authorize_progress(actor, &delivery)?;

        delivery.record_proof(photo, signature, received_by, Utc::now());
        self.db.deliveries().persist_fields(&delivery).await?;
        Ok(delivery)
    }

    /// Records the customer's rating for a delivered parcel.
    ///
    /// Strictly the order owner's call: couriers rating their own work or
    /// admins rating on someone's behalf would make the number worthless.
    ///
    /// ## Errors
    /// `InvalidTransition` unless the parcel is delivered, `Unauthorized`
    /// for anyone but the order's customer.
    pub async fn rate_delivery(
        &self,
        actor: &Actor,
        order_id: &str,
        rating: i64,
        feedback: Option<String>,
    ) -> EngineResult<Delivery> {
        let order = self.require_order(order_id).await?;
        if actor.user_id != order.user_id {
            return Err(CoreError::unauthorized("rate this delivery").into());
        }

        let mut delivery = self.require_delivery_for_order(order_id).await?;
        delivery.rate(rating, feedback, Utc::now())?;
        self.db.deliveries().persist_fields(&delivery).await?;

        info!(
            delivery_id = %delivery.id,
            rating,
            "Delivery rated"
        );
        Ok(delivery)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// The delivery for an order, for its owner or an admin.
    pub async fn get_for_order(&self, actor: &Actor, order_id: &str) -> EngineResult<Delivery> {
        let order = self.require_order(order_id).await?;
        actor.require_owner_or_admin(&order.user_id, "view this delivery")?;
        self.require_delivery_for_order(order_id).await
    }

    /// Public tracking lookup by tracking number.
    ///
    /// No authorization: the tracking number is the capability. Returns
    /// the parcel and its full scan history, oldest first.
    pub async fn track(
        &self,
        tracking_number: &str,
    ) -> EngineResult<(Delivery, Vec<DeliveryEvent>)> {
        let delivery = self
            .db
            .deliveries()
            .get_by_tracking(tracking_number)
            .await?
            .ok_or_else(|| CoreError::not_found("Delivery", tracking_number))?;
        let events = self.db.deliveries().get_events(&delivery.id).await?;
        Ok((delivery, events))
    }

    /// Dispatch queue: parcels in a given status, oldest first.
    pub async fn list_by_status(
        &self,
        actor: &Actor,
        status: DeliveryStatus,
    ) -> EngineResult<Vec<Delivery>> {
        actor.require_admin("list deliveries by status")?;
        Ok(self.db.deliveries().list_by_status(status).await?)
    }

    async fn require_order(&self, order_id: &str) -> EngineResult<Order> {
        let order = self.db.orders().get_by_id(order_id).await?;
        order.ok_or_else(|| CoreError::not_found("Order", order_id).into())
    }

    async fn require_delivery(&self, delivery_id: &str) -> EngineResult<Delivery> {
        let delivery = self.db.deliveries().get_by_id(delivery_id).await?;
        delivery.ok_or_else(|| CoreError::not_found("Delivery", delivery_id).into())
    }

    async fn require_delivery_for_order(&self, order_id: &str) -> EngineResult<Delivery> {
        let delivery = self.db.deliveries().get_by_order(order_id).await?;
        delivery.ok_or_else(|| CoreError::not_found("Delivery", order_id).into())
    }
}

/// Admins always; couriers only for parcels assigned to them.
fn authorize_progress(actor: &Actor, delivery: &Delivery) -> Result<(), CoreError> {
    if actor.role.is_admin() {
        return Ok(());
    }
    if actor.role.is_courier() && delivery.courier_id.as_deref() == Some(actor.user_id.as_str()) {
        return Ok(());
    }
    Err(CoreError::unauthorized("update this delivery"))
}

/// Customer-facing line for a status scan.
fn progress_notification(
    order: &Order,
    delivery: &Delivery,
    status: DeliveryStatus,
) -> NewNotification {
    let (message, priority) = match status {
        DeliveryStatus::OutForDelivery => (
            "Your order is out for delivery.".to_string(),
            NotificationPriority::High,
        ),
        DeliveryStatus::Delivered => (
            "Your order has been delivered.".to_string(),
            NotificationPriority::High,
        ),
        DeliveryStatus::Failed => (
            format!(
                "A delivery attempt for parcel {} failed. We will retry.",
                delivery.tracking_number
            ),
            NotificationPriority::High,
        ),
        other => (
            format!("Parcel {} is now {}.", delivery.tracking_number, other),
            NotificationPriority::Medium,
        ),
    };
    NewNotification::new(
        &order.user_id,
        NotificationKind::DeliveryUpdate,
        "Delivery update",
        message,
    )
    .with_order(order.id.as_str())
    .with_priority(priority)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::{Money, OrderTotals, PaymentMethod, ShippingAddress};
    use meridian_db::{DbConfig, NewOrder, NewOrderLine};

    async fn fulfillment_fixture() -> (FulfillmentService, Arc<Database>) {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let service = FulfillmentService::new(db.clone());
        (service, db)
    }

    async fn seeded_order(db: &Database, user_id: &str) -> Order {
        let new = NewOrder {
            user_id: user_id.to_string(),
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
    async fn test_create_delivery_guards() {
        let (service, db) = fulfillment_fixture().await;
        let order = seeded_order(&db, "user-1").await;
        let admin = Actor::admin("admin-1");

        let err = service
            .create_delivery(&Actor::customer("user-1"), &order.id, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.business(),
            Some(CoreError::Unauthorized { .. })
        ));

        let err = service
            .create_delivery(&admin, "no-such-order", None)
            .await
            .unwrap_err();
        assert!(matches!(err.business(), Some(CoreError::NotFound { .. })));

        let delivery = service.create_delivery(&admin, &order.id, None).await.unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert!(delivery.tracking_number.starts_with("TRK"));

        let err = service
            .create_delivery(&admin, &order.id, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.business(),
            Some(CoreError::DuplicateEntity { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_orders_get_no_delivery() {
        let (service, db) = fulfillment_fixture().await;
        let mut order = seeded_order(&db, "user-1").await;
        order.cancel(Utc::now()).unwrap();
        db.orders().persist_cancellation(&order, &[]).await.unwrap();

        let err = service
            .create_delivery(&Actor::admin("admin-1"), &order.id, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.business(),
            Some(CoreError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_full_run_with_cascades() {
        let (service, db) = fulfillment_fixture().await;
        let order = seeded_order(&db, "user-1").await;
        let admin = Actor::admin("admin-1");
        let courier = Actor::courier("courier-7");

        let delivery = service.create_delivery(&admin, &order.id, None).await.unwrap();
        service
            .assign_courier(&admin, &delivery.id, "courier-7", "Sam")
            .await
            .unwrap();

        let picked = service
            .update_status(&courier, &delivery.id, DeliveryStatus::PickedUp, None, Some("Depot 4"))
            .await
            .unwrap();
        assert!(picked.pickup_time.is_some());

        service
            .update_status(&courier, &delivery.id, DeliveryStatus::InTransit, None, Some("Hub NW"))
            .await
            .unwrap();

        // Out for delivery: the order goes shipped.
        service
            .update_status(&courier, &delivery.id, DeliveryStatus::OutForDelivery, None, None)
            .await
            .unwrap();
        let loaded = db.orders().get_by_id(&order.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, OrderStatus::Shipped);
        assert!(!loaded.is_delivered);

        // Delivered: the order follows with flag and timestamp.
        let delivered = service
            .update_status(&courier, &delivery.id, DeliveryStatus::Delivered, None, None)
            .await
            .unwrap();
        assert!(delivered.actual_delivery_time.is_some());
        let loaded = db.orders().get_by_id(&order.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, OrderStatus::Delivered);
        assert!(loaded.is_delivered);
        assert!(loaded.delivered_at.is_some());

        // History: created, assigned, picked up, in transit, out, delivered.
        let (tracked, events) = service.track(&delivery.tracking_number).await.unwrap();
        assert_eq!(tracked.id, delivery.id);
        assert_eq!(events.len(), 6);
        assert_eq!(events[0].status, DeliveryStatus::Pending);
        assert_eq!(events[5].status, DeliveryStatus::Delivered);

        // Every step after creation notified the customer.
        let notes = db.notifications().list_for_user("user-1", 20).await.unwrap();
        let delivery_notes: Vec<_> = notes
            .iter()
            .filter(|n| n.kind == NotificationKind::DeliveryUpdate)
            .collect();
        assert_eq!(delivery_notes.len(), 5);
        assert!(delivery_notes
            .iter()
            .all(|n| n.order_id.as_deref() == Some(order.id.as_str())));
    }

    #[tokio::test]
    async fn test_only_the_assigned_courier_progresses() {
        let (service, db) = fulfillment_fixture().await;
        let order = seeded_order(&db, "user-1").await;
        let admin = Actor::admin("admin-1");

        let delivery = service.create_delivery(&admin, &order.id, None).await.unwrap();
        service
            .assign_courier(&admin, &delivery.id, "courier-7", "Sam")
            .await
            .unwrap();

        for actor in [Actor::courier("courier-8"), Actor::customer("user-1")] {
            let err = service
                .update_status(&actor, &delivery.id, DeliveryStatus::PickedUp, None, None)
                .await
                .unwrap_err();
            assert!(matches!(
                err.business(),
                Some(CoreError::Unauthorized { .. })
            ));
        }

        // Admin can always step in.
        service
            .update_status(&admin, &delivery.id, DeliveryStatus::PickedUp, None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_attempts_accumulate_and_notify() {
        let (service, db) = fulfillment_fixture().await;
        let order = seeded_order(&db, "user-1").await;
        let admin = Actor::admin("admin-1");
        let delivery = service.create_delivery(&admin, &order.id, None).await.unwrap();

        service
            .update_status(&admin, &delivery.id, DeliveryStatus::OutForDelivery, None, None)
            .await
            .unwrap();
        service
            .update_status(
                &admin,
                &delivery.id,
                DeliveryStatus::Failed,
                Some("nobody home"),
                None,
            )
            .await
            .unwrap();
        service
            .update_status(&admin, &delivery.id, DeliveryStatus::OutForDelivery, None, None)
            .await
            .unwrap();
        let failed = service
            .update_status(&admin, &delivery.id, DeliveryStatus::Failed, Some("refused"), None)
            .await
            .unwrap();

        assert_eq!(failed.delivery_attempts, 2);
        assert_eq!(failed.failure_reason.as_deref(), Some("refused"));

        let queue = service
            .list_by_status(&admin, DeliveryStatus::Failed)
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_rating_is_the_owners_and_needs_delivery() {
        let (service, db) = fulfillment_fixture().await;
        let order = seeded_order(&db, "user-1").await;
        let admin = Actor::admin("admin-1");
        let owner = Actor::customer("user-1");
        let delivery = service.create_delivery(&admin, &order.id, None).await.unwrap();

        // Not delivered yet.
        let err = service
            .rate_delivery(&owner, &order.id, 5, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.business(),
            Some(CoreError::InvalidTransition { .. })
        ));

        service
            .update_status(&admin, &delivery.id, DeliveryStatus::Delivered, None, None)
            .await
            .unwrap();

        // Not even admins rate for the customer.
        for actor in [Actor::customer("user-2"), admin.clone()] {
            let err = service
                .rate_delivery(&actor, &order.id, 5, None)
                .await
                .unwrap_err();
            assert!(matches!(
                err.business(),
                Some(CoreError::Unauthorized { .. })
            ));
        }

        let rated = service
            .rate_delivery(&owner, &order.id, 4, Some("left at door".to_string()))
            .await
            .unwrap();
        assert_eq!(rated.rating, Some(4));
        assert_eq!(rated.feedback.as_deref(), Some("left at door"));

        // Out-of-range ratings are rejected.
        assert!(service.rate_delivery(&owner, &order.id, 6, None).await.is_err());
    }

    #[tokio::test]
    async fn test_proof_of_delivery() {
        let (service, db) = fulfillment_fixture().await;
        let order = seeded_order(&db, "user-1").await;
        let admin = Actor::admin("admin-1");
        let delivery = service.create_delivery(&admin, &order.id, None).await.unwrap();
        service
            .update_status(&admin, &delivery.id, DeliveryStatus::Delivered, None, None)
            .await
            .unwrap();
        let history_before = service.track(&delivery.tracking_number).await.unwrap().1.len();

        let proved = service
            .record_proof(
                &admin,
                &delivery.id,
                Some("photo.jpg".to_string()),
                None,
                Some("J. Doe".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(proved.proof_photo.as_deref(), Some("photo.jpg"));
        assert_eq!(proved.proof_received_by.as_deref(), Some("J. Doe"));

        // Proof is a field write, not a scan.
        let history_after = service.track(&delivery.tracking_number).await.unwrap().1.len();
        assert_eq!(history_before, history_after);
    }

    #[tokio::test]
    async fn test_reads_and_tracking() {
        let (service, db) = fulfillment_fixture().await;
        let order = seeded_order(&db, "user-1").await;
        let admin = Actor::admin("admin-1");
        let delivery = service.create_delivery(&admin, &order.id, None).await.unwrap();

        // Owner and admin read through the order; strangers do not.
        assert!(service
            .get_for_order(&Actor::customer("user-1"), &order.id)
            .await
            .is_ok());
        assert!(service.get_for_order(&admin, &order.id).await.is_ok());
        let err = service
            .get_for_order(&Actor::customer("user-2"), &order.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err.business(),
            Some(CoreError::Unauthorized { .. })
        ));

        // Tracking is public but unknown numbers miss.
        assert!(service.track(&delivery.tracking_number).await.is_ok());
        let err = service.track("TRK0XXXXXX").await.unwrap_err();
        assert!(matches!(err.business(), Some(CoreError::NotFound { .. })));
    }
}
