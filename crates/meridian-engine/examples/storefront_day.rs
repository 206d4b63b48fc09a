//! A full day at the storefront, against a throwaway in-memory database.
//!
//! Walks the whole engine surface once: an admin stocks a product and
//! publishes a coupon, a customer checks out, the gateway settles the
//! payment, the order is accepted (committing the reserved stock), a
//! courier carries the parcel to the door, and the customer leaves a
//! rating.
//!
//! ```bash
//! cargo run -p meridian-engine --example storefront_day
//!
//! # With the db layer's tracing visible:
//! RUST_LOG=debug cargo run -p meridian-engine --example storefront_day
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use meridian_core::{
    Actor, DeliveryStatus, DiscountType, GatewayReceipt, OrderStatus, PaymentMethod,
    ShippingAddress,
};
use meridian_db::{Database, DbConfig, NewCoupon};
use meridian_engine::{CartLine, CheckoutRequest, Engine, EngineConfig, LogSink};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let db = Arc::new(Database::new(DbConfig::in_memory()).await?);
    let mut engine = Engine::new(db, EngineConfig::default());
    engine.start(Arc::new(LogSink));

    let admin = Actor::admin("admin-1");
    let customer = Actor::customer("user-42");

    // Morning: the back office stocks the shelf and publishes a coupon.
    let product = engine
        .db()
        .products()
        .create("Enamel Kettle", "home", 6_500, 0)
        .await?;
    engine
        .stock
        .track_product(&admin, &product.id, 10, 1_000, 15, 50)
        .await?;
    engine
        .stock
        .add_stock(&admin, &product.id, 80, Some("morning intake"), None)
        .await?;
    engine
        .db()
        .coupons()
        .create(NewCoupon {
            code: "OPENING10".to_string(),
            discount_type: DiscountType::Percentage,
            discount_value: 10,
            min_order_amount_cents: 5_000,
            max_discount_amount_cents: Some(2_000),
            usage_limit: Some(100),
            usage_per_user: Some(1),
            applicable_categories: vec![],
            applicable_products: vec![],
            starts_at: Utc::now() - Duration::days(1),
            ends_at: Utc::now() + Duration::days(30),
        })
        .await?;

    // A customer checks out two kettles with the coupon. Placement holds
    // the stock; the on-hand counter does not move yet.
    let placed = engine
        .checkout
        .place_order(
            &customer,
            CheckoutRequest {
                lines: vec![CartLine {
                    product_id: product.id.clone(),
                    quantity: 2,
                }],
                shipping: ShippingAddress {
                    address: "9 Harbour Way".to_string(),
                    city: "Portsmouth".to_string(),
                    postal_code: "PO1 2AB".to_string(),
                    country: "UK".to_string(),
                },
                payment_method: PaymentMethod::Card,
                coupon_code: Some("OPENING10".to_string()),
            },
        )
        .await?;
    let order_id = placed.order.id.clone();
    info!(order = %order_id, total = %placed.order.total(), "Order placed");

    let levels = engine.stock.get_levels(&product.id).await?;
    info!(
        on_hand = levels.current_stock,
        reserved = levels.reserved_stock,
        available = levels.available_stock(),
        "Shelf after placement"
    );

    // The gateway settles the charge. Payment state and the order's paid
    // flag move; the order status does not.
    let (payment, order) = engine
        .payments
        .confirm(
            &customer,
            &placed.payment.id,
            GatewayReceipt {
                reference: "txn_demo_001".to_string(),
                status: "COMPLETED".to_string(),
                payer_email: Some("user-42@example.com".to_string()),
            },
        )
        .await?;
    info!(payment = %payment.id, paid = order.is_paid, "Payment settled");

    // Acceptance commits the hold into the ledger.
    engine
        .checkout
        .update_status(&admin, &order_id, OrderStatus::Processing)
        .await?;
    let levels = engine.stock.get_levels(&product.id).await?;
    info!(
        on_hand = levels.current_stock,
        reserved = levels.reserved_stock,
        "Shelf after acceptance"
    );

    // Afternoon: the parcel goes out and the cascades walk the order home.
    let delivery = engine.fulfillment.create_delivery(&admin, &order_id, None).await?;
    engine
        .fulfillment
        .assign_courier(&admin, &delivery.id, "courier-7", "Sam")
        .await?;
    let courier = Actor::courier("courier-7");
    engine
        .fulfillment
        .update_status(&courier, &delivery.id, DeliveryStatus::PickedUp, None, None)
        .await?;
    engine
        .fulfillment
        .update_status(
            &courier,
            &delivery.id,
            DeliveryStatus::InTransit,
            None,
            Some("sorting depot"),
        )
        .await?;
    engine
        .fulfillment
        .update_status(&courier, &delivery.id, DeliveryStatus::OutForDelivery, None, None)
        .await?;
    engine
        .fulfillment
        .update_status(
            &courier,
            &delivery.id,
            DeliveryStatus::Delivered,
            Some("left with the neighbour"),
            None,
        )
        .await?;

    let order = engine.checkout.get_order(&customer, &order_id).await?;
    info!(status = %order.status, delivered = order.is_delivered, "Order after the last mile");

    engine
        .fulfillment
        .rate_delivery(&customer, &order_id, 5, Some("quick and careful".to_string()))
        .await?;

    // Everything the customer was told along the way.
    let inbox = engine.db().notifications().list_for_user("user-42", 20).await?;
    for note in inbox.iter().rev() {
        info!(kind = %note.kind, "{}: {}", note.title, note.message);
    }

    engine.shutdown().await?;
    Ok(())
}
