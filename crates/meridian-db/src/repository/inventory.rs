//! # Inventory Repository
//!
//! Database operations for stock records and the movement ledger.
//!
//! ## Write Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   Two Kinds of Stock Writes                             │
//! │                                                                         │
//! │  CHECKOUT PATHS (add, remove, return; reserve/commit live in the        │
//! │  reservation repository)                                                │
//! │    One conditional UPDATE: relative counter math, the availability      │
//! │    guard in the WHERE clause, status re-derived in SQL. Two             │
//! │    concurrent orders can never both claim the last unit, because the    │
//! │    check and the decrement are a single statement.                      │
//! │                                                                         │
//! │  ADMIN PATHS (adjust, loss, discontinue, reinstate)                     │
//! │    Load the row, run the same rules the domain layer defines, persist   │
//! │    under a version check. Rare operations where an exact ledger delta   │
//! │    matters more than lock-free throughput.                              │
//! │                                                                         │
//! │  Every physical movement appends a stock_entries row in the same        │
//! │  transaction. Zero rows affected means the guard failed: re-read to     │
//! │  tell "record missing" apart from "not enough stock".                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use meridian_core::{
    validation::validate_quantity, CoreError, InventoryRecord, StockEntry, StockEntryKind,
    StockMovement, StockStatus,
};

/// Status expression re-derived from a new stock level, as a SQL fragment.
///
/// `new_stock` is a SQL expression for the post-update level (for example
/// `current_stock - ?3`). Matches [`StockStatus::derive`], including the
/// discontinued pin.
pub(crate) fn derive_status_sql(new_stock: &str) -> String {
    format!(
        "CASE \
           WHEN status = 'discontinued' THEN 'discontinued' \
           WHEN {new_stock} <= 0 THEN 'out_of_stock' \
           WHEN {new_stock} <= min_stock_level THEN 'low_stock' \
           ELSE 'in_stock' \
         END"
    )
}

/// Appends a movement to the ledger. Called inside the transaction that
/// changed the counters.
pub(crate) async fn insert_stock_entry(
    conn: &mut sqlx::SqliteConnection,
    inventory_id: &str,
    movement: &StockMovement,
    actor_id: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<StockEntry> {
    let entry = StockEntry {
        id: Uuid::new_v4().to_string(),
        inventory_id: inventory_id.to_string(),
        kind: movement.kind,
        quantity: movement.quantity,
        reason: movement.reason.clone(),
        reference: movement.reference.clone(),
        actor_id: actor_id.map(str::to_string),
        created_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO stock_entries (
            id, inventory_id, kind, quantity,
            reason, reference, actor_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.inventory_id)
    .bind(entry.kind)
    .bind(entry.quantity)
    .bind(&entry.reason)
    .bind(&entry.reference)
    .bind(&entry.actor_id)
    .bind(entry.created_at)
    .execute(conn)
    .await?;

    Ok(entry)
}

const SELECT_COLUMNS: &str = "id, product_id, store_id, current_stock, reserved_stock, \
     min_stock_level, max_stock_level, reorder_point, reorder_quantity, \
     status, last_restocked, version, created_at, updated_at";

/// Repository for inventory database operations.
#[derive(Debug, Clone)]
pub struct InventoryRepository {
    pool: SqlitePool,
}

impl InventoryRepository {
    /// Creates a new InventoryRepository.
    pub fn new(pool: SqlitePool) -> Self {
        InventoryRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Gets a stock record by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<InventoryRecord>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM inventory WHERE id = ?1");
        let record = sqlx::query_as::<_, InventoryRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Gets the stock record for a product at a store.
    pub async fn get_for_product(
        &self,
        product_id: &str,
        store_id: &str,
    ) -> DbResult<Option<InventoryRecord>> {
        let sql =
            format!("SELECT {SELECT_COLUMNS} FROM inventory WHERE product_id = ?1 AND store_id = ?2");
        let record = sqlx::query_as::<_, InventoryRecord>(&sql)
            .bind(product_id)
            .bind(store_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Lists records at or below their reorder point, discontinued excluded.
    pub async fn list_needing_reorder(&self, store_id: &str) -> DbResult<Vec<InventoryRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM inventory \
             WHERE store_id = ?1 AND current_stock <= reorder_point \
               AND status != 'discontinued' \
             ORDER BY current_stock ASC"
        );
        let records = sqlx::query_as::<_, InventoryRecord>(&sql)
            .bind(store_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    /// Lists records in a given status at a store.
    pub async fn list_by_status(
        &self,
        store_id: &str,
        status: StockStatus,
    ) -> DbResult<Vec<InventoryRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM inventory \
             WHERE store_id = ?1 AND status = ?2 ORDER BY updated_at DESC"
        );
        let records = sqlx::query_as::<_, InventoryRecord>(&sql)
            .bind(store_id)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    /// Movement history for a record, newest first.
    pub async fn get_history(&self, inventory_id: &str, limit: u32) -> DbResult<Vec<StockEntry>> {
        let entries = sqlx::query_as::<_, StockEntry>(
            r#"
            SELECT id, inventory_id, kind, quantity, reason, reference, actor_id, created_at
            FROM stock_entries
            WHERE inventory_id = ?1
            ORDER BY created_at DESC, id
            LIMIT ?2
            "#,
        )
        .bind(inventory_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    // -------------------------------------------------------------------------
    // Creation
    // -------------------------------------------------------------------------

    /// Creates a stock record with zero stock.
    ///
    /// Initial quantity arrives through [`add_stock`](Self::add_stock) so the
    /// ledger starts complete. One record per (product, store);
    /// a second insert fails with `DuplicateEntity`.
    pub async fn create(
        &self,
        product_id: &str,
        store_id: &str,
        min_stock_level: i64,
        max_stock_level: i64,
        reorder_point: i64,
        reorder_quantity: i64,
    ) -> DbResult<InventoryRecord> {
        let now = Utc::now();
        let record = InventoryRecord {
            id: Uuid::new_v4().to_string(),
            product_id: product_id.to_string(),
            store_id: store_id.to_string(),
            current_stock: 0,
            reserved_stock: 0,
            min_stock_level,
            max_stock_level,
            reorder_point,
            reorder_quantity,
            status: StockStatus::OutOfStock,
            last_restocked: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        debug!(product_id = %product_id, store_id = %store_id, "Creating inventory record");

        sqlx::query(
            r#"
            INSERT INTO inventory (
                id, product_id, store_id,
                current_stock, reserved_stock,
                min_stock_level, max_stock_level, reorder_point, reorder_quantity,
                status, last_restocked, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&record.id)
        .bind(&record.product_id)
        .bind(&record.store_id)
        .bind(record.current_stock)
        .bind(record.reserved_stock)
        .bind(record.min_stock_level)
        .bind(record.max_stock_level)
        .bind(record.reorder_point)
        .bind(record.reorder_quantity)
        .bind(record.status)
        .bind(record.last_restocked)
        .bind(record.version)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::Core(CoreError::DuplicateEntity {
                entity: "Inventory",
                key: format!("{product_id}@{store_id}"),
            }),
            other => other,
        })?;

        Ok(record)
    }

    // -------------------------------------------------------------------------
    // Ledger writes: checkout paths
    // -------------------------------------------------------------------------

    /// Restocks a product and appends the `in` entry.
    pub async fn add_stock(
        &self,
        product_id: &str,
        store_id: &str,
        quantity: i64,
        reason: Option<&str>,
        reference: Option<&str>,
        actor_id: Option<&str>,
    ) -> DbResult<InventoryRecord> {
        validate_quantity(quantity).map_err(CoreError::from)?;
        let now = Utc::now();

        debug!(product_id = %product_id, quantity, "Adding stock");

        let mut tx = self.pool.begin().await?;

        let status_sql = derive_status_sql("current_stock + ?3");
        let sql = format!(
            "UPDATE inventory SET \
                current_stock = current_stock + ?3, \
                last_restocked = ?4, \
                status = {status_sql}, \
                version = version + 1, \
                updated_at = ?4 \
             WHERE product_id = ?1 AND store_id = ?2"
        );
        let result = sqlx::query(&sql)
            .bind(product_id)
            .bind(store_id)
            .bind(quantity)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Inventory", product_id));
        }

        let record = fetch_record_required(&mut tx, product_id, store_id).await?;
        let movement = StockMovement {
            kind: StockEntryKind::In,
            quantity,
            reason: reason.map(str::to_string),
            reference: reference.map(str::to_string),
        };
        insert_stock_entry(&mut tx, &record.id, &movement, actor_id, now).await?;

        tx.commit().await?;
        Ok(record)
    }

    /// Removes fulfilled stock and appends the `out` entry.
    ///
    /// The availability check rides in the UPDATE's WHERE clause, so a
    /// concurrent removal cannot overdraw the record. Zero rows affected
    /// means the guard failed; a re-read distinguishes a missing record
    /// from insufficient stock.
    pub async fn remove_stock(
        &self,
        product_id: &str,
        store_id: &str,
        quantity: i64,
        reason: Option<&str>,
        reference: Option<&str>,
        actor_id: Option<&str>,
    ) -> DbResult<InventoryRecord> {
        validate_quantity(quantity).map_err(CoreError::from)?;
        let now = Utc::now();

        debug!(product_id = %product_id, quantity, "Removing stock");

        let mut tx = self.pool.begin().await?;

        let status_sql = derive_status_sql("current_stock - ?3");
        let sql = format!(
            "UPDATE inventory SET \
                current_stock = current_stock - ?3, \
                status = {status_sql}, \
                version = version + 1, \
                updated_at = ?4 \
             WHERE product_id = ?1 AND store_id = ?2 \
               AND current_stock - reserved_stock >= ?3"
        );
        let result = sqlx::query(&sql)
            .bind(product_id)
            .bind(store_id)
            .bind(quantity)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .guard_failure(&mut tx, product_id, store_id, quantity)
                .await);
        }

        let record = fetch_record_required(&mut tx, product_id, store_id).await?;
        let movement = StockMovement {
            kind: StockEntryKind::Out,
            quantity: -quantity,
            reason: reason.map(str::to_string),
            reference: reference.map(str::to_string),
        };
        insert_stock_entry(&mut tx, &record.id, &movement, actor_id, now).await?;

        tx.commit().await?;
        Ok(record)
    }

    /// Restocks returned units and appends the `return` entry.
    pub async fn record_return(
        &self,
        product_id: &str,
        store_id: &str,
        quantity: i64,
        reference: Option<&str>,
        actor_id: Option<&str>,
    ) -> DbResult<InventoryRecord> {
        validate_quantity(quantity).map_err(CoreError::from)?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        let status_sql = derive_status_sql("current_stock + ?3");
        let sql = format!(
            "UPDATE inventory SET \
                current_stock = current_stock + ?3, \
                status = {status_sql}, \
                version = version + 1, \
                updated_at = ?4 \
             WHERE product_id = ?1 AND store_id = ?2"
        );
        let result = sqlx::query(&sql)
            .bind(product_id)
            .bind(store_id)
            .bind(quantity)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Inventory", product_id));
        }

        let record = fetch_record_required(&mut tx, product_id, store_id).await?;
        let movement = StockMovement {
            kind: StockEntryKind::Return,
            quantity,
            reason: None,
            reference: reference.map(str::to_string),
        };
        insert_stock_entry(&mut tx, &record.id, &movement, actor_id, now).await?;

        tx.commit().await?;
        Ok(record)
    }

    // -------------------------------------------------------------------------
    // Ledger writes: admin paths
    // -------------------------------------------------------------------------

    /// Corrects the total to a counted value and records the signed delta.
    ///
    /// Runs the domain rules on a loaded snapshot and persists under a
    /// version check, because the ledger delta must match the actual
    /// old total exactly.
    pub async fn adjust_stock(
        &self,
        product_id: &str,
        store_id: &str,
        new_total: i64,
        reason: Option<&str>,
        actor_id: Option<&str>,
    ) -> DbResult<InventoryRecord> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let mut record = fetch_record_required(&mut tx, product_id, store_id).await?;
        let mut movement = record.adjust_stock(new_total, now)?;
        if let Some(reason) = reason {
            movement = movement.with_reason(reason);
        }

        persist_snapshot(&mut tx, &record).await?;
        insert_stock_entry(&mut tx, &record.id, &movement, actor_id, now).await?;

        tx.commit().await?;
        Ok(record)
    }

    /// Writes off expired or damaged units.
    pub async fn record_loss(
        &self,
        product_id: &str,
        store_id: &str,
        quantity: i64,
        kind: StockEntryKind,
        reason: Option<&str>,
        actor_id: Option<&str>,
    ) -> DbResult<InventoryRecord> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let mut record = fetch_record_required(&mut tx, product_id, store_id).await?;
        let mut movement = record.record_loss(quantity, kind, now)?;
        if let Some(reason) = reason {
            movement = movement.with_reason(reason);
        }

        persist_snapshot(&mut tx, &record).await?;
        insert_stock_entry(&mut tx, &record.id, &movement, actor_id, now).await?;

        tx.commit().await?;
        Ok(record)
    }

    /// Pins the record to discontinued.
    pub async fn discontinue(&self, product_id: &str, store_id: &str) -> DbResult<InventoryRecord> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let mut record = fetch_record_required(&mut tx, product_id, store_id).await?;
        record.discontinue(now);
        persist_snapshot(&mut tx, &record).await?;

        tx.commit().await?;
        Ok(record)
    }

    /// Clears the discontinued pin and re-derives status.
    pub async fn reinstate(&self, product_id: &str, store_id: &str) -> DbResult<InventoryRecord> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let mut record = fetch_record_required(&mut tx, product_id, store_id).await?;
        record.reinstate(now);
        persist_snapshot(&mut tx, &record).await?;

        tx.commit().await?;
        Ok(record)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Builds the typed error for a failed removal guard.
    async fn guard_failure(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        product_id: &str,
        store_id: &str,
        requested: i64,
    ) -> DbError {
        match fetch_record(tx, product_id, store_id).await {
            Ok(Some(record)) => DbError::Core(CoreError::InsufficientStock {
                product_id: product_id.to_string(),
                available: record.available_stock(),
                requested,
            }),
            Ok(None) => DbError::not_found("Inventory", product_id),
            Err(e) => e,
        }
    }
}

/// In-transaction record fetch, shared with the reservation repository.
pub(crate) async fn fetch_record(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    product_id: &str,
    store_id: &str,
) -> DbResult<Option<InventoryRecord>> {
    let sql =
        format!("SELECT {SELECT_COLUMNS} FROM inventory WHERE product_id = ?1 AND store_id = ?2");
    let record = sqlx::query_as::<_, InventoryRecord>(&sql)
        .bind(product_id)
        .bind(store_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(record)
}

pub(crate) async fn fetch_record_required(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    product_id: &str,
    store_id: &str,
) -> DbResult<InventoryRecord> {
    fetch_record(tx, product_id, store_id)
        .await?
        .ok_or_else(|| DbError::not_found("Inventory", product_id))
}

/// Persists a domain-mutated snapshot under a version check.
///
/// The snapshot's version was already bumped by the mutation, so the row
/// must still be at `version - 1`. Zero rows affected means another writer
/// got there first; the caller's transaction rolls back untouched.
async fn persist_snapshot(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    record: &InventoryRecord,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE inventory SET
            current_stock = ?2,
            reserved_stock = ?3,
            status = ?4,
            last_restocked = ?5,
            version = ?6,
            updated_at = ?7
        WHERE id = ?1 AND version = ?6 - 1
        "#,
    )
    .bind(&record.id)
    .bind(record.current_stock)
    .bind(record.reserved_stock)
    .bind(record.status)
    .bind(record.last_restocked)
    .bind(record.version)
    .bind(record.updated_at)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::TransactionFailed(format!(
            "inventory {} changed concurrently, retry",
            record.id
        )));
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use meridian_core::DEFAULT_STORE_ID;

    async fn db_with_product() -> (Database, String) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = db.products().create("Widget", "tools", 1_000, 0).await.unwrap();
        db.inventory()
            .create(&product.id, DEFAULT_STORE_ID, 10, 1_000, 20, 100)
            .await
            .unwrap();
        (db, product.id)
    }

    #[tokio::test]
    async fn test_create_starts_empty_and_out_of_stock() {
        let (db, product_id) = db_with_product().await;
        let record = db
            .inventory()
            .get_for_product(&product_id, DEFAULT_STORE_ID)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.current_stock, 0);
        assert_eq!(record.status, StockStatus::OutOfStock);
    }

    #[tokio::test]
    async fn test_duplicate_record_rejected() {
        let (db, product_id) = db_with_product().await;
        let err = db
            .inventory()
            .create(&product_id, DEFAULT_STORE_ID, 10, 1_000, 20, 100)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Core(CoreError::DuplicateEntity { .. })
        ));
    }

    #[tokio::test]
    async fn test_add_stock_updates_counters_and_ledger() {
        let (db, product_id) = db_with_product().await;
        let repo = db.inventory();

        let record = repo
            .add_stock(&product_id, DEFAULT_STORE_ID, 50, Some("initial intake"), None, None)
            .await
            .unwrap();

        assert_eq!(record.current_stock, 50);
        assert_eq!(record.status, StockStatus::InStock);
        assert!(record.last_restocked.is_some());

        let history = repo.get_history(&record.id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, StockEntryKind::In);
        assert_eq!(history[0].quantity, 50);
        assert_eq!(history[0].reason.as_deref(), Some("initial intake"));
    }

    #[tokio::test]
    async fn test_remove_stock_guard() {
        let (db, product_id) = db_with_product().await;
        let repo = db.inventory();
        repo.add_stock(&product_id, DEFAULT_STORE_ID, 5, None, None, None)
            .await
            .unwrap();

        let err = repo
            .remove_stock(&product_id, DEFAULT_STORE_ID, 6, None, None, None)
            .await
            .unwrap_err();
        match err {
            DbError::Core(CoreError::InsufficientStock {
                available,
                requested,
                ..
            }) => {
                assert_eq!(available, 5);
                assert_eq!(requested, 6);
            }
            other => panic!("expected InsufficientStock, got {other}"),
        }

        // Record unchanged after the failed removal.
        let record = repo
            .get_for_product(&product_id, DEFAULT_STORE_ID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.current_stock, 5);
        assert_eq!(repo.get_history(&record.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_stock_drives_status() {
        let (db, product_id) = db_with_product().await;
        let repo = db.inventory();
        repo.add_stock(&product_id, DEFAULT_STORE_ID, 12, None, None, None)
            .await
            .unwrap();

        let record = repo
            .remove_stock(&product_id, DEFAULT_STORE_ID, 2, None, Some("order-1"), None)
            .await
            .unwrap();
        assert_eq!(record.status, StockStatus::LowStock); // 10 <= min 10

        let record = repo
            .remove_stock(&product_id, DEFAULT_STORE_ID, 10, None, None, None)
            .await
            .unwrap();
        assert_eq!(record.status, StockStatus::OutOfStock);
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let (db, _) = db_with_product().await;
        let err = db
            .inventory()
            .remove_stock("ghost", DEFAULT_STORE_ID, 1, None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_adjust_stock_records_exact_delta() {
        let (db, product_id) = db_with_product().await;
        let repo = db.inventory();
        repo.add_stock(&product_id, DEFAULT_STORE_ID, 80, None, None, None)
            .await
            .unwrap();

        let record = repo
            .adjust_stock(&product_id, DEFAULT_STORE_ID, 73, Some("cycle count"), Some("admin-1"))
            .await
            .unwrap();
        assert_eq!(record.current_stock, 73);

        let history = repo.get_history(&record.id, 10).await.unwrap();
        let adjustment = history
            .iter()
            .find(|e| e.kind == StockEntryKind::Adjustment)
            .unwrap();
        assert_eq!(adjustment.quantity, -7);
        assert_eq!(adjustment.actor_id.as_deref(), Some("admin-1"));
    }

    #[tokio::test]
    async fn test_record_loss_and_return() {
        let (db, product_id) = db_with_product().await;
        let repo = db.inventory();
        repo.add_stock(&product_id, DEFAULT_STORE_ID, 30, None, None, None)
            .await
            .unwrap();

        let record = repo
            .record_loss(
                &product_id,
                DEFAULT_STORE_ID,
                3,
                StockEntryKind::Damaged,
                Some("forklift accident"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(record.current_stock, 27);

        let record = repo
            .record_return(&product_id, DEFAULT_STORE_ID, 2, Some("order-9"), None)
            .await
            .unwrap();
        assert_eq!(record.current_stock, 29);
    }

    #[tokio::test]
    async fn test_record_loss_shrinks_a_hold() {
        let (db, product_id) = db_with_product().await;
        let repo = db.inventory();
        repo.add_stock(&product_id, DEFAULT_STORE_ID, 10, None, None, None)
            .await
            .unwrap();
        db.reservations()
            .reserve("order-1", &product_id, DEFAULT_STORE_ID, 8, 60)
            .await
            .unwrap();

        // The write-off is allowed to eat into the hold; what survives of
        // the reservation is capped by what is physically left.
        let record = repo
            .record_loss(
                &product_id,
                DEFAULT_STORE_ID,
                3,
                StockEntryKind::Damaged,
                Some("water damage"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(record.current_stock, 7);
        assert_eq!(record.reserved_stock, 7);
        assert_eq!(record.available_stock(), 0);
    }

    #[tokio::test]
    async fn test_ledger_sums_to_current_stock() {
        let (db, product_id) = db_with_product().await;
        let repo = db.inventory();

        repo.add_stock(&product_id, DEFAULT_STORE_ID, 100, None, None, None)
            .await
            .unwrap();
        repo.remove_stock(&product_id, DEFAULT_STORE_ID, 25, None, None, None)
            .await
            .unwrap();
        repo.record_return(&product_id, DEFAULT_STORE_ID, 5, None, None)
            .await
            .unwrap();
        repo.record_loss(&product_id, DEFAULT_STORE_ID, 3, StockEntryKind::Expired, None, None)
            .await
            .unwrap();
        let record = repo
            .adjust_stock(&product_id, DEFAULT_STORE_ID, 70, None, None)
            .await
            .unwrap();

        let history = repo.get_history(&record.id, 100).await.unwrap();
        let sum: i64 = history.iter().map(|e| e.quantity).sum();
        assert_eq!(sum, record.current_stock);
        assert_eq!(record.current_stock, 70);
    }

    #[tokio::test]
    async fn test_discontinued_is_sticky_through_sql_writes() {
        let (db, product_id) = db_with_product().await;
        let repo = db.inventory();
        repo.add_stock(&product_id, DEFAULT_STORE_ID, 50, None, None, None)
            .await
            .unwrap();

        repo.discontinue(&product_id, DEFAULT_STORE_ID).await.unwrap();

        // The SQL status CASE must keep the pin.
        let record = repo
            .add_stock(&product_id, DEFAULT_STORE_ID, 10, None, None, None)
            .await
            .unwrap();
        assert_eq!(record.status, StockStatus::Discontinued);

        let record = repo.reinstate(&product_id, DEFAULT_STORE_ID).await.unwrap();
        assert_eq!(record.status, StockStatus::InStock);
    }

    #[tokio::test]
    async fn test_sql_writes_match_domain_model() {
        // Differential check: the same operation sequence through SQL and
        // through the in-memory rules must land on identical counters.
        let (db, product_id) = db_with_product().await;
        let repo = db.inventory();

        let mut model = repo
            .get_for_product(&product_id, DEFAULT_STORE_ID)
            .await
            .unwrap()
            .unwrap();
        let now = Utc::now();

        model.add_stock(40, now).unwrap();
        repo.add_stock(&product_id, DEFAULT_STORE_ID, 40, None, None, None)
            .await
            .unwrap();

        model.remove_stock(15, now).unwrap();
        repo.remove_stock(&product_id, DEFAULT_STORE_ID, 15, None, None, None)
            .await
            .unwrap();

        model.record_return(4, now).unwrap();
        let stored = repo
            .record_return(&product_id, DEFAULT_STORE_ID, 4, None, None)
            .await
            .unwrap();

        assert_eq!(stored.current_stock, model.current_stock);
        assert_eq!(stored.reserved_stock, model.reserved_stock);
        assert_eq!(stored.status, model.status);
    }

    #[tokio::test]
    async fn test_list_needing_reorder() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let low = db.products().create("Low", "x", 100, 0).await.unwrap();
        let high = db.products().create("High", "x", 100, 0).await.unwrap();
        let repo = db.inventory();
        repo.create(&low.id, DEFAULT_STORE_ID, 10, 1_000, 20, 100)
            .await
            .unwrap();
        repo.create(&high.id, DEFAULT_STORE_ID, 10, 1_000, 20, 100)
            .await
            .unwrap();

        repo.add_stock(&low.id, DEFAULT_STORE_ID, 20, None, None, None)
            .await
            .unwrap();
        repo.add_stock(&high.id, DEFAULT_STORE_ID, 21, None, None, None)
            .await
            .unwrap();

        let needing = repo.list_needing_reorder(DEFAULT_STORE_ID).await.unwrap();
        assert_eq!(needing.len(), 1);
        assert_eq!(needing[0].product_id, low.id);
    }
}
