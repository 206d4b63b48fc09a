//! # Checkout Service
//!
//! Order placement, acceptance, and cancellation, keeping stock, coupons,
//! payments, and notifications consistent across the steps.
//!
//! ## Placement Saga
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Order Placement                                 │
//! │                                                                         │
//! │  1. snapshot    load products, take effective prices                    │
//! │  2. coupon      resolve code, check restrictions, price the discount    │
//! │  3. price       items + tax + shipping - discount                       │
//! │  4. create      order row + lines + "order placed" notification         │
//! │  5. hold        one stock reservation per line             ──┐          │
//! │  6. redeem      consume the coupon slot (discount > 0)       │ on any   │
//! │  7. payment     open the payment record                      │ failure  │
//! │                                                              ▼          │
//! │                     unwind: release the holds, give the coupon slot     │
//! │                     back, cancel the order                              │
//! │                                                                         │
//! │  The order row is created before the holds so the holds can carry its   │
//! │  id. A placement that fails past step 4 leaves a cancelled order        │
//! │  behind as the audit trail of the attempt.                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Stock Lifecycle Across the Order
//! ```text
//! place        hold per line              (reserved += qty)
//! accept       commit every hold          (current -= qty, ledger `out`)
//! cancel       before acceptance: release (reserved -= qty)
//!              after acceptance:  return  (current += qty, ledger `return`)
//! abandoned    sweeper expires the holds after their TTL
//! ```
//!
//! Cancellation goes through [`CheckoutService::cancel_order`], never
//! through a status update, because the two stock compensations above
//! depend on how far the order got.

use chrono::Utc;
use meridian_core::validation::{validate_order_items_count, validate_quantity};
use meridian_core::{
    Actor, CoreError, Coupon, Money, NewNotification, NotificationKind, Order, OrderStatus,
    OrderTotals, Payment, PaymentMethod, Product, ReservationStatus, ShippingAddress,
};
use meridian_db::{Database, NewOrder, NewOrderLine};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::stock::reorder_alert;

// =============================================================================
// Request and Response Types
// =============================================================================

/// One line of a cart at checkout.
#[derive(Debug, Clone)]
pub struct CartLine {
    pub product_id: String,
    pub quantity: i64,
}

/// Everything a customer submits at checkout.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub lines: Vec<CartLine>,
    pub shipping: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<String>,
}

/// A successfully placed order with its opened payment record.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: Order,
    pub payment: Payment,
}

// =============================================================================
// Checkout Service
// =============================================================================

/// Orchestrates order placement and the order lifecycle's stock effects.
pub struct CheckoutService {
    db: Arc<Database>,
    config: Arc<EngineConfig>,
}

impl CheckoutService {
    pub fn new(db: Arc<Database>, config: Arc<EngineConfig>) -> Self {
        CheckoutService { db, config }
    }

    // -------------------------------------------------------------------------
    // Placement
    // -------------------------------------------------------------------------

    /// Places an order for the acting customer.
    ///
    /// Prices are snapshotted from the live catalog at this moment: the
    /// discount price when one is set, the regular price otherwise. Stock
    /// is held per line until the order is accepted or cancelled, or until
    /// the holds expire.
    ///
    /// ## Errors
    /// - `NotFound` for an unknown or inactive product, or an unknown
    ///   coupon code
    /// - `CouponNotApplicable` when the coupon's product or category
    ///   restrictions miss the cart
    /// - `InsufficientStock` when a line cannot be covered by available
    ///   stock; everything placed so far is unwound
    pub async fn place_order(
        &self,
        actor: &Actor,
        request: CheckoutRequest,
    ) -> EngineResult<PlacedOrder> {
        let now = Utc::now();
        validate_order_items_count(request.lines.len()).map_err(CoreError::from)?;
        for line in &request.lines {
            validate_quantity(line.quantity).map_err(CoreError::from)?;
        }

        // Snapshot the catalog.
        let ids: Vec<String> = request.lines.iter().map(|l| l.product_id.clone()).collect();
        let products = self.db.products().get_many(&ids).await?;
        let by_id: HashMap<&str, &Product> =
            products.iter().map(|p| (p.id.as_str(), p)).collect();

        let mut lines = Vec::with_capacity(request.lines.len());
        for cart in &request.lines {
            let product = by_id
                .get(cart.product_id.as_str())
                .filter(|p| p.is_active)
                .ok_or_else(|| CoreError::not_found("Product", &cart.product_id))?;
            lines.push(NewOrderLine {
                product_id: product.id.clone(),
                name: product.name.clone(),
                quantity: cart.quantity,
                unit_price_cents: product.effective_price().cents(),
            });
        }

        let items: Money = lines
            .iter()
            .map(|l| Money::from_cents(l.unit_price_cents).multiply_quantity(l.quantity))
            .sum();

        let (coupon, discount) = self
            .evaluate_coupon(request.coupon_code.as_deref(), &products, items, now)
            .await?;

        let tax = items.calculate_tax(self.config.checkout.tax_rate_bps);
        let shipping_cost = self.config.checkout.shipping_cost(items);
        let totals = OrderTotals::compute(items, discount, tax, shipping_cost);

        let placed_note = NewNotification::new(
            &actor.user_id,
            NotificationKind::OrderPlaced,
            "Order placed",
            format!(
                "Your order of {} item(s) totalling {} was received.",
                lines.len(),
                totals.total
            ),
        );

        let order = self
            .db
            .orders()
            .create(
                NewOrder {
                    user_id: actor.user_id.clone(),
                    payment_method: request.payment_method,
                    coupon_code: coupon.as_ref().map(|c| c.code.clone()),
                    totals,
                    shipping: request.shipping,
                    lines,
                },
                &[placed_note],
            )
            .await?;

        debug!(
            order_id = %order.id,
            user_id = %actor.user_id,
            total = %totals.total,
            "Order created, holding stock"
        );

        // Hold stock per line. A single line that cannot be covered fails
        // the whole placement.
        for item in &order.items {
            if let Err(e) = self
                .db
                .reservations()
                .reserve(
                    &order.id,
                    &item.product_id,
                    self.config.store_id(),
                    item.quantity,
                    self.config.reservations.ttl_minutes,
                )
                .await
            {
                warn!(
                    order_id = %order.id,
                    product_id = %item.product_id,
                    error = %e,
                    "Stock hold failed, unwinding placement"
                );
                self.unwind_placement(&order, None).await;
                return Err(e.into());
            }
        }

        // Consume the coupon slot only when it actually takes money off.
        let mut redeemed: Option<String> = None;
        if let Some(coupon) = &coupon {
            if discount.is_positive() {
                if let Err(e) = self.db.coupons().redeem(&coupon.code).await {
                    warn!(
                        order_id = %order.id,
                        code = %coupon.code,
                        error = %e,
                        "Coupon redemption failed, unwinding placement"
                    );
                    self.unwind_placement(&order, None).await;
                    return Err(e.into());
                }
                redeemed = Some(coupon.code.clone());
            }
        }

        // Open the payment record. Cash on delivery carries no gateway.
        let gateway = match order.payment_method {
            PaymentMethod::CashOnDelivery => None,
            method => Some(method.to_string()),
        };
        let payment = match self
            .db
            .payments()
            .create(
                &order.id,
                &actor.user_id,
                order.total_cents,
                order.payment_method,
                gateway.as_deref(),
            )
            .await
        {
            Ok(payment) => payment,
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Opening payment failed, unwinding placement");
                self.unwind_placement(&order, redeemed.as_deref()).await;
                return Err(e.into());
            }
        };

        info!(
            order_id = %order.id,
            user_id = %actor.user_id,
            lines = order.items.len(),
            total = %order.total(),
            coupon = redeemed.as_deref().unwrap_or("-"),
            "Order placed"
        );

        Ok(PlacedOrder { order, payment })
    }

    /// Resolves a coupon code against the cart.
    ///
    /// An unknown code and a restriction miss are hard failures; the
    /// customer typed something that can never work for this cart. A coupon
    /// that is merely not worth anything right now, outside its window,
    /// over its limit, or under its minimum, contributes a zero discount
    /// and the order goes through at full price.
    async fn evaluate_coupon(
        &self,
        code: Option<&str>,
        products: &[Product],
        items: Money,
        now: chrono::DateTime<Utc>,
    ) -> EngineResult<(Option<Coupon>, Money)> {
        let Some(code) = code else {
            return Ok((None, Money::zero()));
        };

        let coupon = self
            .db
            .coupons()
            .get_by_code(code)
            .await?
            .ok_or_else(|| CoreError::not_found("Coupon", code))?;

        coupon.check_applicability(products)?;
        let discount = coupon.calculate_discount(items, now);

        debug!(code = %coupon.code, discount = %discount, "Coupon evaluated");
        Ok((Some(coupon), discount))
    }

    /// Best-effort compensation for a placement that failed partway.
    ///
    /// Failures here are logged and swallowed; the caller returns the
    /// original placement error either way. Stock holds that slip through
    /// are caught by the reservation sweeper once their TTL runs out.
    async fn unwind_placement(&self, order: &Order, redeemed_code: Option<&str>) {
        if let Err(e) = self.db.reservations().release_for_order(&order.id).await {
            warn!(order_id = %order.id, error = %e, "Unwind: releasing stock holds failed");
        }

        if let Some(code) = redeemed_code {
            if let Err(e) = self.db.coupons().release_redemption(code).await {
                warn!(order_id = %order.id, code = %code, error = %e, "Unwind: releasing coupon slot failed");
            }
        }

        let mut order = order.clone();
        if let Err(e) = order.cancel(Utc::now()) {
            warn!(order_id = %order.id, error = %e, "Unwind: order not cancellable");
            return;
        }
        if let Err(e) = self.db.orders().persist_cancellation(&order, &[]).await {
            warn!(order_id = %order.id, error = %e, "Unwind: cancelling order failed");
        }
    }

    // -------------------------------------------------------------------------
    // Cancellation
    // -------------------------------------------------------------------------

    /// Cancels an order on behalf of its owner or an admin.
    ///
    /// The stock compensation depends on how far the order got: before
    /// acceptance the holds are released; after acceptance the units
    /// already left the ledger and come back as a `return` entry.
    ///
    /// Cancelling an already-cancelled order is a no-op that returns the
    /// order as is, so a double-submitted cancel cannot restock twice.
    ///
    /// ## Errors
    /// `InvalidTransition` once the order has been delivered,
    /// `Unauthorized` for anyone but the owner or an admin.
    pub async fn cancel_order(&self, actor: &Actor, order_id: &str) -> EngineResult<Order> {
        let mut order = self.require_order(order_id).await?;
        actor.require_owner_or_admin(&order.user_id, "cancel this order")?;

        if order.status == OrderStatus::Cancelled {
            debug!(order_id = %order.id, "Order already cancelled");
            return Ok(order);
        }

        let previous = order.status;
        let now = Utc::now();
        order.cancel(now)?;

        let note = NewNotification::new(
            &order.user_id,
            NotificationKind::OrderCancelled,
            "Order cancelled",
            format!("Your order {} has been cancelled.", order.id),
        )
        .with_order(order.id.as_str());

        // The guarded write claims the cancellation first; the stock
        // compensation below only runs for the claim that won.
        self.db.orders().persist_cancellation(&order, &[note]).await?;

        match previous {
            OrderStatus::Pending => {
                let released = self.db.reservations().release_for_order(&order.id).await?;
                debug!(
                    order_id = %order.id,
                    released = released.len(),
                    "Released stock holds for cancelled order"
                );
            }
            OrderStatus::Processing | OrderStatus::Shipped => {
                // The holds were committed at acceptance; the units come
                // back onto the shelf as returns.
                for item in &order.items {
                    self.db
                        .inventory()
                        .record_return(
                            &item.product_id,
                            self.config.store_id(),
                            item.quantity,
                            Some(order.id.as_str()),
                            Some(actor.user_id.as_str()),
                        )
                        .await?;
                }
            }
            // Delivered fails `cancel` above; Cancelled returned early.
            OrderStatus::Delivered | OrderStatus::Cancelled => {}
        }

        info!(order_id = %order.id, from = %previous, "Order cancelled");
        Ok(order)
    }

    // -------------------------------------------------------------------------
    // Admin progression
    // -------------------------------------------------------------------------

    /// Walks an order along pending, processing, shipped, delivered.
    ///
    /// Accepting an order (the move to processing) is the point where its
    /// stock holds become real exits: every hold is committed and the `out`
    /// ledger entries are written, referencing the order.
    ///
    /// ## Errors
    /// - `Unauthorized` for non-admins
    /// - `InvalidTransition` for skips, backtracks, and a `cancelled`
    ///   target; cancellation has its own path with stock compensation
    /// - `InsufficientStock` when lapsed holds cannot be re-reserved at
    ///   acceptance; the order stays where it was
    pub async fn update_status(
        &self,
        actor: &Actor,
        order_id: &str,
        next: OrderStatus,
    ) -> EngineResult<Order> {
        actor.require_admin("update order status")?;

        let mut order = self.require_order(order_id).await?;

        if next == OrderStatus::Cancelled {
            return Err(CoreError::invalid_transition(
                "Order",
                order_id,
                order.status.to_string(),
                "be cancelled through a status update",
            )
            .into());
        }

        let previous = order.status;
        order.transition_to(next, Utc::now())?;

        if next == OrderStatus::Processing {
            self.commit_holds(&order, actor).await?;

            if let Err(e) = self.db.orders().persist_status(&order, previous, &[]).await {
                // Lost a race, most likely to a concurrent cancellation.
                // The commits above already took the stock; give it back.
                warn!(
                    order_id = %order.id,
                    error = %e,
                    "Acceptance lost a race, restocking committed holds"
                );
                for item in &order.items {
                    if let Err(undo) = self
                        .db
                        .inventory()
                        .record_return(
                            &item.product_id,
                            self.config.store_id(),
                            item.quantity,
                            Some(order.id.as_str()),
                            Some(actor.user_id.as_str()),
                        )
                        .await
                    {
                        warn!(
                            order_id = %order.id,
                            product_id = %item.product_id,
                            error = %undo,
                            "Restock after lost acceptance failed"
                        );
                    }
                }
                return Err(e.into());
            }
        } else {
            self.db.orders().persist_status(&order, previous, &[]).await?;
        }

        info!(order_id = %order.id, from = %previous, to = %next, "Order status updated");
        Ok(order)
    }

    /// Turns the order's stock holds into ledger exits.
    ///
    /// Holds that expired and were swept are re-reserved first; when the
    /// stock has been sold to someone else in the meantime this fails with
    /// `InsufficientStock` and nothing is committed. Lines whose holds were
    /// already committed by an earlier, partially failed acceptance are
    /// skipped, so retrying is safe.
    async fn commit_holds(&self, order: &Order, actor: &Actor) -> EngineResult<()> {
        let store_id = self.config.store_id();
        let reservations = self.db.reservations().list_for_order(&order.id).await?;

        for item in &order.items {
            let covered: i64 = reservations
                .iter()
                .filter(|r| {
                    r.product_id == item.product_id
                        && matches!(
                            r.status,
                            ReservationStatus::Held | ReservationStatus::Committed
                        )
                })
                .map(|r| r.quantity)
                .sum();
            let shortfall = item.quantity - covered;
            if shortfall > 0 {
                warn!(
                    order_id = %order.id,
                    product_id = %item.product_id,
                    shortfall,
                    "Stock holds lapsed before acceptance, re-reserving"
                );
                self.db
                    .reservations()
                    .reserve(
                        &order.id,
                        &item.product_id,
                        store_id,
                        shortfall,
                        self.config.reservations.ttl_minutes,
                    )
                    .await?;
            }
        }

        // Every line is covered by a hold now; commit them all.
        let holds = self.db.reservations().list_for_order(&order.id).await?;
        for hold in holds.iter().filter(|r| r.is_held()) {
            let (committed, record) = self
                .db
                .reservations()
                .commit(&hold.id, Some(actor.user_id.as_str()))
                .await?;
            debug!(
                order_id = %order.id,
                product_id = %committed.product_id,
                quantity = committed.quantity,
                remaining = record.current_stock,
                "Stock hold committed"
            );
            reorder_alert(
                &self.db,
                &self.config,
                &record,
                record.current_stock + committed.quantity,
            )
            .await;
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Loads an order for its owner or an admin.
    pub async fn get_order(&self, actor: &Actor, order_id: &str) -> EngineResult<Order> {
        let order = self.require_order(order_id).await?;
        actor.require_owner_or_admin(&order.user_id, "view this order")?;
        Ok(order)
    }

    /// The acting customer's orders, newest first.
    pub async fn list_my_orders(&self, actor: &Actor) -> EngineResult<Vec<Order>> {
        Ok(self.db.orders().list_for_user(&actor.user_id).await?)
    }

    /// Orders in a given state, for the fulfilment queue. Admin only.
    pub async fn list_orders_by_status(
        &self,
        actor: &Actor,
        status: OrderStatus,
    ) -> EngineResult<Vec<Order>> {
        actor.require_admin("list orders by status")?;
        Ok(self.db.orders().list_by_status(status).await?)
    }

    async fn require_order(&self, order_id: &str) -> EngineResult<Order> {
        let order = self.db.orders().get_by_id(order_id).await?;
        order.ok_or_else(|| CoreError::not_found("Order", order_id).into())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use meridian_core::{
        DiscountType, NotificationKind, PaymentStatus, StockEntryKind, DEFAULT_STORE_ID,
    };
    use meridian_db::{DbConfig, NewCoupon};

    async fn checkout_fixture() -> (CheckoutService, Arc<Database>) {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let service = CheckoutService::new(db.clone(), Arc::new(EngineConfig::default()));
        (service, db)
    }

    async fn seed_product(
        db: &Database,
        name: &str,
        price_cents: i64,
        discount_price_cents: i64,
        stock: i64,
    ) -> Product {
        let product = db
            .products()
            .create(name, "electronics", price_cents, discount_price_cents)
            .await
            .unwrap();
        db.inventory()
            .create(&product.id, DEFAULT_STORE_ID, 5, 1_000, 10, 50)
            .await
            .unwrap();
        if stock > 0 {
            db.inventory()
                .add_stock(
                    &product.id,
                    DEFAULT_STORE_ID,
                    stock,
                    Some("initial intake"),
                    None,
                    None,
                )
                .await
                .unwrap();
        }
        product
    }

    async fn seed_coupon(db: &Database, code: &str, new: NewCoupon) -> Coupon {
        let mut new = new;
        new.code = code.to_string();
        db.coupons().create(new).await.unwrap()
    }

    fn coupon_base() -> NewCoupon {
        NewCoupon {
            code: String::new(),
            discount_type: DiscountType::Percentage,
            discount_value: 20,
            min_order_amount_cents: 0,
            max_discount_amount_cents: None,
            usage_limit: None,
            usage_per_user: None,
            applicable_categories: vec![],
            applicable_products: vec![],
            starts_at: Utc::now() - Duration::days(1),
            ends_at: Utc::now() + Duration::days(30),
        }
    }

    fn address() -> ShippingAddress {
        ShippingAddress {
            address: "1 Main St".to_string(),
            city: "Springfield".to_string(),
            postal_code: "12345".to_string(),
            country: "US".to_string(),
        }
    }

    fn cart(product: &Product, quantity: i64) -> CartLine {
        CartLine {
            product_id: product.id.clone(),
            quantity,
        }
    }

    fn request(lines: Vec<CartLine>) -> CheckoutRequest {
        CheckoutRequest {
            lines,
            shipping: address(),
            payment_method: PaymentMethod::Card,
            coupon_code: None,
        }
    }

    async fn stock_of(db: &Database, product: &Product) -> (i64, i64) {
        let record = db
            .inventory()
            .get_for_product(&product.id, DEFAULT_STORE_ID)
            .await
            .unwrap()
            .unwrap();
        (record.current_stock, record.reserved_stock)
    }

    // -------------------------------------------------------------------------
    // Placement
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_place_order_snapshots_prices_and_holds_stock() {
        let (service, db) = checkout_fixture().await;
        // Discounted: effective price is the discount price.
        let speaker = seed_product(&db, "Speaker", 2_500, 2_000, 20).await;
        let keyboard = seed_product(&db, "Keyboard", 5_000, 0, 10).await;
        let customer = Actor::customer("user-1");

        let placed = service
            .place_order(&customer, request(vec![cart(&speaker, 2), cart(&keyboard, 1)]))
            .await
            .unwrap();

        // items 9000, tax 15% = 1350, under the free-shipping threshold.
        let order = &placed.order;
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.items_price_cents, 9_000);
        assert_eq!(order.tax_cents, 1_350);
        assert_eq!(order.shipping_cents, 1_000);
        assert_eq!(order.discount_cents, 0);
        assert_eq!(order.total_cents, 11_350);
        assert_eq!(order.items[0].unit_price_cents, 2_000);
        assert_eq!(order.items[1].unit_price_cents, 5_000);

        // A catalog repricing after placement never reaches the order.
        db.products().update_pricing(&speaker.id, 3_000, 0).await.unwrap();
        let reread = db.orders().get_by_id(&order.id).await.unwrap().unwrap();
        assert_eq!(reread.items[0].unit_price_cents, 2_000);

        // Card goes straight to the gateway.
        assert_eq!(placed.payment.amount_cents, 11_350);
        assert_eq!(placed.payment.status, PaymentStatus::Processing);
        assert_eq!(placed.payment.gateway.as_deref(), Some("card"));

        // Stock is held, not gone.
        assert_eq!(stock_of(&db, &speaker).await, (20, 2));
        assert_eq!(stock_of(&db, &keyboard).await, (10, 1));
        let holds = db.reservations().list_for_order(&order.id).await.unwrap();
        assert_eq!(holds.len(), 2);
        assert!(holds.iter().all(|r| r.is_held()));

        // Placement notification carries the order id.
        let notes = db.notifications().list_for_user("user-1", 10).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, NotificationKind::OrderPlaced);
        assert_eq!(notes[0].order_id.as_deref(), Some(order.id.as_str()));
    }

    #[tokio::test]
    async fn test_place_order_rejects_unknown_and_inactive_products() {
        let (service, db) = checkout_fixture().await;
        let customer = Actor::customer("user-1");

        let err = service
            .place_order(
                &customer,
                request(vec![CartLine {
                    product_id: "nope".to_string(),
                    quantity: 1,
                }]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err.business(), Some(CoreError::NotFound { .. })));

        let retired = seed_product(&db, "Retired", 1_000, 0, 5).await;
        db.products().deactivate(&retired.id).await.unwrap();
        let err = service
            .place_order(&customer, request(vec![cart(&retired, 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err.business(), Some(CoreError::NotFound { .. })));

        // Nothing was written.
        assert!(db.orders().list_for_user("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_stock_unwinds_the_placement() {
        let (service, db) = checkout_fixture().await;
        let plenty = seed_product(&db, "Plenty", 1_000, 0, 20).await;
        let scarce = seed_product(&db, "Scarce", 1_000, 0, 2).await;
        let customer = Actor::customer("user-1");

        let err = service
            .place_order(&customer, request(vec![cart(&plenty, 2), cart(&scarce, 5)]))
            .await
            .unwrap_err();

        match err.business() {
            Some(CoreError::InsufficientStock {
                available,
                requested,
                ..
            }) => {
                assert_eq!(*available, 2);
                assert_eq!(*requested, 5);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }

        // The attempt is on record as a cancelled order.
        let orders = db.orders().list_for_user("user-1").await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Cancelled);

        // The first line's hold was given back.
        assert_eq!(stock_of(&db, &plenty).await, (20, 0));
        assert_eq!(stock_of(&db, &scarce).await, (2, 0));

        // No payment was opened.
        assert!(db
            .payments()
            .get_active_for_order(&orders[0].id)
            .await
            .unwrap()
            .is_none());
    }

    // -------------------------------------------------------------------------
    // Coupons at checkout
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_coupon_discounts_and_consumes_a_slot() {
        let (service, db) = checkout_fixture().await;
        let product = seed_product(&db, "Monitor", 10_000, 0, 10).await;
        seed_coupon(&db, "SAVE20", coupon_base()).await;
        let customer = Actor::customer("user-1");

        let mut req = request(vec![cart(&product, 2)]);
        req.coupon_code = Some("SAVE20".to_string());
        let placed = service.place_order(&customer, req).await.unwrap();

        // items 20000: free shipping, 20% off, tax on the items total.
        assert_eq!(placed.order.items_price_cents, 20_000);
        assert_eq!(placed.order.discount_cents, 4_000);
        assert_eq!(placed.order.tax_cents, 3_000);
        assert_eq!(placed.order.shipping_cents, 0);
        assert_eq!(placed.order.total_cents, 19_000);
        assert_eq!(placed.order.coupon_code.as_deref(), Some("SAVE20"));

        let coupon = db.coupons().get_by_code("SAVE20").await.unwrap().unwrap();
        assert_eq!(coupon.used_count, 1);
    }

    #[tokio::test]
    async fn test_lapsed_coupon_contributes_zero_discount() {
        let (service, db) = checkout_fixture().await;
        let product = seed_product(&db, "Monitor", 10_000, 0, 10).await;
        let mut lapsed = coupon_base();
        lapsed.starts_at = Utc::now() - Duration::days(10);
        lapsed.ends_at = Utc::now() - Duration::hours(1);
        seed_coupon(&db, "LASTYEAR", lapsed).await;
        let customer = Actor::customer("user-1");

        let mut req = request(vec![cart(&product, 1)]);
        req.coupon_code = Some("LASTYEAR".to_string());
        let placed = service.place_order(&customer, req).await.unwrap();

        assert_eq!(placed.order.discount_cents, 0);
        // No slot consumed for a discount that never happened.
        let coupon = db.coupons().get_by_code("LASTYEAR").await.unwrap().unwrap();
        assert_eq!(coupon.used_count, 0);
    }

    #[tokio::test]
    async fn test_coupon_restriction_miss_fails_the_checkout() {
        let (service, db) = checkout_fixture().await;
        let product = seed_product(&db, "Monitor", 10_000, 0, 10).await;
        let mut books_only = coupon_base();
        books_only.applicable_categories = vec!["books".to_string()];
        seed_coupon(&db, "BOOKWORM", books_only).await;
        let customer = Actor::customer("user-1");

        let mut req = request(vec![cart(&product, 1)]);
        req.coupon_code = Some("BOOKWORM".to_string());
        let err = service.place_order(&customer, req).await.unwrap_err();

        assert!(matches!(
            err.business(),
            Some(CoreError::CouponNotApplicable { .. })
        ));
        // Failed before anything was written.
        assert!(db.orders().list_for_user("user-1").await.unwrap().is_empty());
        assert_eq!(stock_of(&db, &product).await, (10, 0));
    }

    #[tokio::test]
    async fn test_unknown_coupon_code_fails_the_checkout() {
        let (service, db) = checkout_fixture().await;
        let product = seed_product(&db, "Monitor", 10_000, 0, 10).await;
        let customer = Actor::customer("user-1");

        let mut req = request(vec![cart(&product, 1)]);
        req.coupon_code = Some("NOSUCH".to_string());
        let err = service.place_order(&customer, req).await.unwrap_err();

        assert!(matches!(err.business(), Some(CoreError::NotFound { .. })));
    }

    // -------------------------------------------------------------------------
    // Cancellation
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_cancel_pending_order_releases_the_holds() {
        let (service, db) = checkout_fixture().await;
        let product = seed_product(&db, "Lamp", 3_000, 0, 10).await;
        let customer = Actor::customer("user-1");

        let placed = service
            .place_order(&customer, request(vec![cart(&product, 3)]))
            .await
            .unwrap();
        assert_eq!(stock_of(&db, &product).await, (10, 3));

        let cancelled = service.cancel_order(&customer, &placed.order.id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        // Holds released; the shelf count never moved.
        assert_eq!(stock_of(&db, &product).await, (10, 0));

        let notes = db.notifications().list_for_user("user-1", 10).await.unwrap();
        assert!(notes
            .iter()
            .any(|n| n.kind == NotificationKind::OrderCancelled));
    }

    #[tokio::test]
    async fn test_cancel_requires_owner_or_admin() {
        let (service, db) = checkout_fixture().await;
        let product = seed_product(&db, "Lamp", 3_000, 0, 10).await;
        let owner = Actor::customer("user-1");

        let placed = service
            .place_order(&owner, request(vec![cart(&product, 1)]))
            .await
            .unwrap();

        let err = service
            .cancel_order(&Actor::customer("user-2"), &placed.order.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err.business(),
            Some(CoreError::Unauthorized { .. })
        ));

        // Admins can cancel on the customer's behalf.
        service
            .cancel_order(&Actor::admin("admin-1"), &placed.order.id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_twice_does_not_release_twice() {
        let (service, db) = checkout_fixture().await;
        let product = seed_product(&db, "Lamp", 3_000, 0, 10).await;
        let customer = Actor::customer("user-1");

        let placed = service
            .place_order(&customer, request(vec![cart(&product, 3)]))
            .await
            .unwrap();

        service.cancel_order(&customer, &placed.order.id).await.unwrap();
        let again = service.cancel_order(&customer, &placed.order.id).await.unwrap();
        assert_eq!(again.status, OrderStatus::Cancelled);

        // Counters untouched by the second cancel.
        assert_eq!(stock_of(&db, &product).await, (10, 0));
    }

    #[tokio::test]
    async fn test_cancel_after_acceptance_restocks_as_return() {
        let (service, db) = checkout_fixture().await;
        let product = seed_product(&db, "Desk", 20_000, 0, 50).await;
        let customer = Actor::customer("user-1");
        let admin = Actor::admin("admin-1");

        let placed = service
            .place_order(&customer, request(vec![cart(&product, 30)]))
            .await
            .unwrap();
        service
            .update_status(&admin, &placed.order.id, OrderStatus::Processing)
            .await
            .unwrap();
        assert_eq!(stock_of(&db, &product).await, (20, 0));

        service.cancel_order(&admin, &placed.order.id).await.unwrap();
        assert_eq!(stock_of(&db, &product).await, (50, 0));

        // Ledger shows the round trip: out at acceptance, return at cancel.
        let record = db
            .inventory()
            .get_for_product(&product.id, DEFAULT_STORE_ID)
            .await
            .unwrap()
            .unwrap();
        let history = db.inventory().get_history(&record.id, 10).await.unwrap();
        let kinds: Vec<StockEntryKind> = history.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&StockEntryKind::Out));
        assert!(kinds.contains(&StockEntryKind::Return));
        let ret = history
            .iter()
            .find(|e| e.kind == StockEntryKind::Return)
            .unwrap();
        assert_eq!(ret.quantity, 30);
        assert_eq!(ret.reference.as_deref(), Some(placed.order.id.as_str()));
    }

    // -------------------------------------------------------------------------
    // Admin progression
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_acceptance_commits_holds_to_the_ledger() {
        let (service, db) = checkout_fixture().await;
        let product = seed_product(&db, "Desk", 20_000, 0, 50).await;
        let customer = Actor::customer("user-1");
        let admin = Actor::admin("admin-1");

        let placed = service
            .place_order(&customer, request(vec![cart(&product, 30)]))
            .await
            .unwrap();
        assert_eq!(stock_of(&db, &product).await, (50, 30));

        let accepted = service
            .update_status(&admin, &placed.order.id, OrderStatus::Processing)
            .await
            .unwrap();
        assert_eq!(accepted.status, OrderStatus::Processing);

        // The units are gone from the shelf and the hold is settled.
        assert_eq!(stock_of(&db, &product).await, (20, 0));
        let holds = db
            .reservations()
            .list_for_order(&placed.order.id)
            .await
            .unwrap();
        assert!(holds
            .iter()
            .all(|r| r.status == ReservationStatus::Committed));

        // The exit references the order.
        let record = db
            .inventory()
            .get_for_product(&product.id, DEFAULT_STORE_ID)
            .await
            .unwrap()
            .unwrap();
        let history = db.inventory().get_history(&record.id, 10).await.unwrap();
        let out = history
            .iter()
            .find(|e| e.kind == StockEntryKind::Out)
            .unwrap();
        assert_eq!(out.quantity, -30);
        assert_eq!(out.reference.as_deref(), Some(placed.order.id.as_str()));
    }

    #[tokio::test]
    async fn test_update_status_is_admin_only() {
        let (service, db) = checkout_fixture().await;
        let product = seed_product(&db, "Desk", 20_000, 0, 10).await;
        let customer = Actor::customer("user-1");

        let placed = service
            .place_order(&customer, request(vec![cart(&product, 1)]))
            .await
            .unwrap();

        let err = service
            .update_status(&customer, &placed.order.id, OrderStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(
            err.business(),
            Some(CoreError::Unauthorized { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_status_rejects_skips_and_cancelled_target() {
        let (service, db) = checkout_fixture().await;
        let product = seed_product(&db, "Desk", 20_000, 0, 10).await;
        let customer = Actor::customer("user-1");
        let admin = Actor::admin("admin-1");

        let placed = service
            .place_order(&customer, request(vec![cart(&product, 1)]))
            .await
            .unwrap();

        // Pending cannot jump to shipped.
        let err = service
            .update_status(&admin, &placed.order.id, OrderStatus::Shipped)
            .await
            .unwrap_err();
        assert!(matches!(
            err.business(),
            Some(CoreError::InvalidTransition { .. })
        ));

        // Cancellation is not a status update.
        let err = service
            .update_status(&admin, &placed.order.id, OrderStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(
            err.business(),
            Some(CoreError::InvalidTransition { .. })
        ));

        // The skip attempt burned nothing.
        assert_eq!(stock_of(&db, &product).await, (10, 1));
    }

    #[tokio::test]
    async fn test_acceptance_rereserves_lapsed_holds() {
        let (service, db) = checkout_fixture().await;
        let product = seed_product(&db, "Desk", 20_000, 0, 10).await;
        let customer = Actor::customer("user-1");
        let admin = Actor::admin("admin-1");

        let placed = service
            .place_order(&customer, request(vec![cart(&product, 5)]))
            .await
            .unwrap();

        // The sweeper got to the hold before the admin did.
        let holds = db
            .reservations()
            .list_for_order(&placed.order.id)
            .await
            .unwrap();
        db.reservations().expire(&holds[0].id).await.unwrap();
        assert_eq!(stock_of(&db, &product).await, (10, 0));

        // Acceptance re-reserves and commits.
        service
            .update_status(&admin, &placed.order.id, OrderStatus::Processing)
            .await
            .unwrap();
        assert_eq!(stock_of(&db, &product).await, (5, 0));
    }

    #[tokio::test]
    async fn test_acceptance_fails_when_lapsed_stock_was_resold() {
        let (service, db) = checkout_fixture().await;
        let product = seed_product(&db, "Desk", 20_000, 0, 6).await;
        let customer = Actor::customer("user-1");
        let admin = Actor::admin("admin-1");

        let placed = service
            .place_order(&customer, request(vec![cart(&product, 5)]))
            .await
            .unwrap();

        // Hold lapses and most of the stock goes out the door.
        let holds = db
            .reservations()
            .list_for_order(&placed.order.id)
            .await
            .unwrap();
        db.reservations().expire(&holds[0].id).await.unwrap();
        db.inventory()
            .remove_stock(&product.id, DEFAULT_STORE_ID, 4, Some("walk-in sale"), None, None)
            .await
            .unwrap();

        let err = service
            .update_status(&admin, &placed.order.id, OrderStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(
            err.business(),
            Some(CoreError::InsufficientStock { .. })
        ));

        // The order did not move.
        let order = db.orders().get_by_id(&placed.order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_acceptance_crossing_reorder_point_alerts_the_manager() {
        let (service, db) = checkout_fixture().await;
        // reorder_point is 10; 12 on the shelf, 5 sold crosses it.
        let product = seed_product(&db, "Desk", 20_000, 0, 12).await;
        let customer = Actor::customer("user-1");
        let admin = Actor::admin("admin-1");

        let placed = service
            .place_order(&customer, request(vec![cart(&product, 5)]))
            .await
            .unwrap();
        service
            .update_status(&admin, &placed.order.id, OrderStatus::Processing)
            .await
            .unwrap();

        // Default config routes stock alerts to the "admin" manager id.
        let alerts = db.notifications().list_for_user("admin", 10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, NotificationKind::StockAlert);
    }

    // -------------------------------------------------------------------------
    // Reads and authorization
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_order_reads_respect_ownership() {
        let (service, db) = checkout_fixture().await;
        let product = seed_product(&db, "Desk", 20_000, 0, 10).await;
        let owner = Actor::customer("user-1");

        let placed = service
            .place_order(&owner, request(vec![cart(&product, 1)]))
            .await
            .unwrap();

        assert!(service.get_order(&owner, &placed.order.id).await.is_ok());
        assert!(service
            .get_order(&Actor::admin("admin-1"), &placed.order.id)
            .await
            .is_ok());

        let err = service
            .get_order(&Actor::customer("user-2"), &placed.order.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err.business(),
            Some(CoreError::Unauthorized { .. })
        ));

        assert_eq!(service.list_my_orders(&owner).await.unwrap().len(), 1);

        let err = service
            .list_orders_by_status(&owner, OrderStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(
            err.business(),
            Some(CoreError::Unauthorized { .. })
        ));
        assert_eq!(
            service
                .list_orders_by_status(&Actor::admin("admin-1"), OrderStatus::Pending)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
