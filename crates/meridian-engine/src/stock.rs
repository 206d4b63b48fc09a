//! # Stock Service
//!
//! Admin-facing stock control: intake, removals, corrections, write-offs,
//! and the reorder alerting that rides along with every downward movement.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stock Movements                                  │
//! │                                                                         │
//! │  add_stock        supplier intake        current += qty   (`in`)        │
//! │  remove_stock     manual sale/pull       current -= qty   (`out`)       │
//! │  record_return    customer return        current += qty   (`return`)    │
//! │  record_expired   write-off              current -= qty   (`expired`)   │
//! │  record_damaged   write-off              current -= qty   (`damaged`)   │
//! │  adjust_stock     shelf count correction current  = n     (`adjustment`)│
//! │                                                                         │
//! │  Every movement appends to the ledger. Removals are checked against     │
//! │  available stock so held reservations cannot be pulled out from under   │
//! │  their orders; write-offs are capped by on-hand stock only, and any     │
//! │  hold on destroyed units shrinks with them.                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Customer-driven movements (holds, commits, cancellation returns) live in
//! the checkout service; this one is the back-office door.

use meridian_core::{
    Actor, CoreError, InventoryRecord, NewNotification, NotificationKind, NotificationPriority,
    StockEntry, StockEntryKind, StockStatus,
};
use meridian_db::Database;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::EngineResult;

/// Queues a reorder alert when a movement drags the total down through the
/// reorder point.
///
/// Fires only on the crossing, not on every movement below the point, so a
/// product sitting under its reorder point does not page the manager again
/// for each sale. Discontinued records never alert. Delivery is best
/// effort; a full notification queue must not fail the stock movement that
/// triggered it.
pub(crate) async fn reorder_alert(
    db: &Database,
    config: &EngineConfig,
    record: &InventoryRecord,
    previous_stock: i64,
) {
    if record.status == StockStatus::Discontinued {
        return;
    }
    if !record.needs_reorder() || previous_stock <= record.reorder_point {
        return;
    }

    let alert = NewNotification::new(
        &config.store.manager_id,
        NotificationKind::StockAlert,
        "Reorder needed",
        format!(
            "Product {} is down to {} unit(s), at or below its reorder point of {}. Suggested reorder: {} unit(s).",
            record.product_id, record.current_stock, record.reorder_point, record.reorder_quantity
        ),
    )
    .with_priority(NotificationPriority::High);

    if let Err(e) = db.notifications().enqueue(&alert).await {
        warn!(
            product_id = %record.product_id,
            error = %e,
            "Failed to queue reorder alert"
        );
    }
}

/// Back-office stock operations for the configured store.
pub struct StockService {
    db: Arc<Database>,
    config: Arc<EngineConfig>,
}

impl StockService {
    pub fn new(db: Arc<Database>, config: Arc<EngineConfig>) -> Self {
        StockService { db, config }
    }

    fn store_id(&self) -> &str {
        self.config.store_id()
    }

    // -------------------------------------------------------------------------
    // Record lifecycle
    // -------------------------------------------------------------------------

    /// Starts tracking stock for a product at the configured store.
    ///
    /// The record opens at zero units with `out_of_stock` status; intake
    /// happens through [`add_stock`](Self::add_stock).
    ///
    /// ## Errors
    /// `DuplicateEntity` when the product is already tracked here.
    pub async fn track_product(
        &self,
        actor: &Actor,
        product_id: &str,
        min_stock_level: i64,
        max_stock_level: i64,
        reorder_point: i64,
        reorder_quantity: i64,
    ) -> EngineResult<InventoryRecord> {
        actor.require_admin("track product stock")?;
        let record = self
            .db
            .inventory()
            .create(
                product_id,
                self.store_id(),
                min_stock_level,
                max_stock_level,
                reorder_point,
                reorder_quantity,
            )
            .await?;
        info!(product_id, inventory_id = %record.id, "Stock tracking started");
        Ok(record)
    }

    /// Pins the record to `discontinued`. Movements keep the pin.
    pub async fn discontinue(&self, actor: &Actor, product_id: &str) -> EngineResult<InventoryRecord> {
        actor.require_admin("discontinue a product")?;
        let record = self.db.inventory().discontinue(product_id, self.store_id()).await?;
        info!(product_id, "Product discontinued");
        Ok(record)
    }

    /// Clears the pin and re-derives status from the current level.
    pub async fn reinstate(&self, actor: &Actor, product_id: &str) -> EngineResult<InventoryRecord> {
        actor.require_admin("reinstate a product")?;
        let record = self.db.inventory().reinstate(product_id, self.store_id()).await?;
        info!(product_id, status = %record.status, "Product reinstated");
        Ok(record)
    }

    // -------------------------------------------------------------------------
    // Movements
    // -------------------------------------------------------------------------

    /// Supplier intake. Stamps `last_restocked` and re-derives status.
    pub async fn add_stock(
        &self,
        actor: &Actor,
        product_id: &str,
        quantity: i64,
        reason: Option<&str>,
        reference: Option<&str>,
    ) -> EngineResult<InventoryRecord> {
        actor.require_admin("add stock")?;
        let record = self
            .db
            .inventory()
            .add_stock(
                product_id,
                self.store_id(),
                quantity,
                reason,
                reference,
                Some(actor.user_id.as_str()),
            )
            .await?;
        info!(
            product_id,
            quantity,
            current = record.current_stock,
            "Stock added"
        );
        Ok(record)
    }

    /// Manual removal, for sales that bypass checkout or stock pulls.
    ///
    /// ## Errors
    /// `InsufficientStock` when the quantity exceeds available stock; held
    /// reservations keep their units.
    pub async fn remove_stock(
        &self,
        actor: &Actor,
        product_id: &str,
        quantity: i64,
        reason: Option<&str>,
        reference: Option<&str>,
    ) -> EngineResult<InventoryRecord> {
        actor.require_admin("remove stock")?;
        let record = self
            .db
            .inventory()
            .remove_stock(
                product_id,
                self.store_id(),
                quantity,
                reason,
                reference,
                Some(actor.user_id.as_str()),
            )
            .await?;
        info!(
            product_id,
            quantity,
            current = record.current_stock,
            "Stock removed"
        );
        reorder_alert(&self.db, &self.config, &record, record.current_stock + quantity).await;
        Ok(record)
    }

    /// Restocks returned units with a `return` ledger entry.
    pub async fn record_return(
        &self,
        actor: &Actor,
        product_id: &str,
        quantity: i64,
        reference: Option<&str>,
    ) -> EngineResult<InventoryRecord> {
        actor.require_admin("record a stock return")?;
        let record = self
            .db
            .inventory()
            .record_return(
                product_id,
                self.store_id(),
                quantity,
                reference,
                Some(actor.user_id.as_str()),
            )
            .await?;
        info!(
            product_id,
            quantity,
            current = record.current_stock,
            "Stock return recorded"
        );
        Ok(record)
    }

    /// Writes off units past their expiry date.
    pub async fn record_expired(
        &self,
        actor: &Actor,
        product_id: &str,
        quantity: i64,
        reason: Option<&str>,
    ) -> EngineResult<InventoryRecord> {
        self.record_loss(actor, product_id, quantity, StockEntryKind::Expired, reason)
            .await
    }

    /// Writes off damaged units.
    pub async fn record_damaged(
        &self,
        actor: &Actor,
        product_id: &str,
        quantity: i64,
        reason: Option<&str>,
    ) -> EngineResult<InventoryRecord> {
        self.record_loss(actor, product_id, quantity, StockEntryKind::Damaged, reason)
            .await
    }

    async fn record_loss(
        &self,
        actor: &Actor,
        product_id: &str,
        quantity: i64,
        kind: StockEntryKind,
        reason: Option<&str>,
    ) -> EngineResult<InventoryRecord> {
        actor.require_admin("write off stock")?;
        let record = self
            .db
            .inventory()
            .record_loss(
                product_id,
                self.store_id(),
                quantity,
                kind,
                reason,
                Some(actor.user_id.as_str()),
            )
            .await?;
        info!(
            product_id,
            quantity,
            kind = %kind,
            current = record.current_stock,
            "Stock written off"
        );
        reorder_alert(&self.db, &self.config, &record, record.current_stock + quantity).await;
        Ok(record)
    }

    /// Corrects the total to a counted shelf level.
    ///
    /// The ledger records the signed delta, so history still sums to the
    /// current level after the correction. The new total cannot drop below
    /// the reserved count.
    pub async fn adjust_stock(
        &self,
        actor: &Actor,
        product_id: &str,
        new_total: i64,
        reason: Option<&str>,
    ) -> EngineResult<InventoryRecord> {
        actor.require_admin("adjust stock")?;
        // The repo returns only the corrected row, so take the previous
        // level here for the crossing check.
        let previous = self
            .db
            .inventory()
            .get_for_product(product_id, self.store_id())
            .await?
            .map(|r| r.current_stock);
        let record = self
            .db
            .inventory()
            .adjust_stock(
                product_id,
                self.store_id(),
                new_total,
                reason,
                Some(actor.user_id.as_str()),
            )
            .await?;
        info!(product_id, new_total, "Stock adjusted");
        if let Some(previous) = previous {
            reorder_alert(&self.db, &self.config, &record, previous).await;
        }
        Ok(record)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Current levels for a product at the configured store.
    ///
    /// Open to any caller; the storefront needs availability to render
    /// product pages.
    pub async fn get_levels(&self, product_id: &str) -> EngineResult<InventoryRecord> {
        let record = self
            .db
            .inventory()
            .get_for_product(product_id, self.store_id())
            .await?;
        record.ok_or_else(|| CoreError::not_found("Inventory", product_id).into())
    }

    /// Movement ledger for a product, newest entries first.
    pub async fn get_history(
        &self,
        actor: &Actor,
        product_id: &str,
        limit: u32,
    ) -> EngineResult<Vec<StockEntry>> {
        actor.require_admin("read the stock ledger")?;
        let record = self.get_levels(product_id).await?;
        Ok(self.db.inventory().get_history(&record.id, limit).await?)
    }

    /// Products at or below their reorder point, lowest stock first.
    /// Discontinued records are excluded.
    pub async fn list_needing_reorder(&self, actor: &Actor) -> EngineResult<Vec<InventoryRecord>> {
        actor.require_admin("list products needing reorder")?;
        Ok(self.db.inventory().list_needing_reorder(self.store_id()).await?)
    }

    /// Records in a given stock status, most recently moved first.
    pub async fn list_by_status(
        &self,
        actor: &Actor,
        status: StockStatus,
    ) -> EngineResult<Vec<InventoryRecord>> {
        actor.require_admin("list stock by status")?;
        Ok(self.db.inventory().list_by_status(self.store_id(), status).await?)
    }
}

// =============================================================================
// Tests
// =============================================================================
