//! # Reservation Repository
//!
//! Stock holds and the two-phase reserve/commit flow.
//!
//! ## Reservation Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Reservation Lifecycle                                │
//! │                                                                         │
//! │  1. RESERVE (checkout)                                                  │
//! │     └── one transaction:                                                │
//! │         UPDATE inventory SET reserved += q                              │
//! │             WHERE available >= q        ← the oversell guard            │
//! │         INSERT INTO reservations (..., status = 'held', expires_at)     │
//! │                                                                         │
//! │  2a. COMMIT (order fulfilled)                                           │
//! │      └── current -= q AND reserved -= q, ledger entry appended,         │
//! │          reservation marked 'committed'                                 │
//! │                                                                         │
//! │  2b. RELEASE (order cancelled)     2c. EXPIRE (sweeper)                 │
//! │      └── reserved -= q (clamped),      └── same, status = 'expired'     │
//! │          status = 'released'                                            │
//! │                                                                         │
//! │  Settling a reservation twice is a no-op: the row's status gates the    │
//! │  counter math, so a double release can never drive reserved negative.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::inventory::{
    derive_status_sql, fetch_record, fetch_record_required, insert_stock_entry,
};
use meridian_core::{
    validation::validate_quantity, CoreError, InventoryRecord, Reservation, ReservationStatus,
    StockEntryKind, StockMovement,
};

const SELECT_COLUMNS: &str =
    "id, order_id, product_id, store_id, quantity, status, expires_at, created_at, updated_at";

/// Repository for reservation database operations.
#[derive(Debug, Clone)]
pub struct ReservationRepository {
    pool: SqlitePool,
}

impl ReservationRepository {
    /// Creates a new ReservationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReservationRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Gets a reservation by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Reservation>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM reservations WHERE id = ?1");
        let reservation = sqlx::query_as::<_, Reservation>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(reservation)
    }

    /// All reservations for an order, oldest first.
    pub async fn list_for_order(&self, order_id: &str) -> DbResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM reservations \
             WHERE order_id = ?1 ORDER BY created_at"
        );
        let reservations = sqlx::query_as::<_, Reservation>(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(reservations)
    }

    /// Held reservations that outlived their expiry, oldest deadline first.
    pub async fn list_expired(&self, limit: u32) -> DbResult<Vec<Reservation>> {
        let now = Utc::now();
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM reservations \
             WHERE status = 'held' AND expires_at <= ?1 \
             ORDER BY expires_at ASC LIMIT ?2"
        );
        let reservations = sqlx::query_as::<_, Reservation>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(reservations)
    }

    // -------------------------------------------------------------------------
    // Phase one: hold stock
    // -------------------------------------------------------------------------

    /// Reserves available stock for an order.
    ///
    /// The availability check and the counter increment are one UPDATE, so
    /// two concurrent checkouts cannot both claim the last unit. The hold
    /// expires after `ttl_minutes` unless committed or released first.
    pub async fn reserve(
        &self,
        order_id: &str,
        product_id: &str,
        store_id: &str,
        quantity: i64,
        ttl_minutes: i64,
    ) -> DbResult<Reservation> {
        validate_quantity(quantity).map_err(CoreError::from)?;
        let now = Utc::now();

        debug!(order_id = %order_id, product_id = %product_id, quantity, "Reserving stock");

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE inventory SET
                reserved_stock = reserved_stock + ?3,
                version = version + 1,
                updated_at = ?4
            WHERE product_id = ?1 AND store_id = ?2
              AND current_stock - reserved_stock >= ?3
            "#,
        )
        .bind(product_id)
        .bind(store_id)
        .bind(quantity)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(match fetch_record(&mut tx, product_id, store_id).await {
                Ok(Some(record)) => DbError::Core(CoreError::InsufficientStock {
                    product_id: product_id.to_string(),
                    available: record.available_stock(),
                    requested: quantity,
                }),
                Ok(None) => DbError::not_found("Inventory", product_id),
                Err(e) => e,
            });
        }

        let reservation = Reservation {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            product_id: product_id.to_string(),
            store_id: store_id.to_string(),
            quantity,
            status: ReservationStatus::Held,
            expires_at: Reservation::expiry_from(now, ttl_minutes),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO reservations (
                id, order_id, product_id, store_id,
                quantity, status, expires_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&reservation.id)
        .bind(&reservation.order_id)
        .bind(&reservation.product_id)
        .bind(&reservation.store_id)
        .bind(reservation.quantity)
        .bind(reservation.status)
        .bind(reservation.expires_at)
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(reservation)
    }

    // -------------------------------------------------------------------------
    // Phase two: settle the hold
    // -------------------------------------------------------------------------

    /// Commits a hold: the promised units physically leave the shelf.
    ///
    /// Drops both counters, appends the `out` ledger entry referencing the
    /// order, and marks the reservation committed. Returns the settled
    /// reservation and the updated stock record.
    ///
    /// ## Errors
    /// `InvalidTransition` when the reservation is not held,
    /// `InsufficientStock` when the shelf no longer covers the quantity.
    pub async fn commit(
        &self,
        reservation_id: &str,
        actor_id: Option<&str>,
    ) -> DbResult<(Reservation, InventoryRecord)> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let mut reservation = fetch_reservation(&mut tx, reservation_id)
            .await?
            .ok_or_else(|| DbError::not_found("Reservation", reservation_id))?;

        if !reservation.is_held() {
            return Err(DbError::Core(CoreError::invalid_transition(
                "Reservation",
                reservation_id,
                reservation.status.to_string(),
                "commit",
            )));
        }

        let status_sql = derive_status_sql("current_stock - ?3");
        let sql = format!(
            "UPDATE inventory SET \
                current_stock = current_stock - ?3, \
                reserved_stock = MAX(0, reserved_stock - ?3), \
                status = {status_sql}, \
                version = version + 1, \
                updated_at = ?4 \
             WHERE product_id = ?1 AND store_id = ?2 AND current_stock >= ?3"
        );
        let result = sqlx::query(&sql)
            .bind(&reservation.product_id)
            .bind(&reservation.store_id)
            .bind(reservation.quantity)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(
                match fetch_record(&mut tx, &reservation.product_id, &reservation.store_id).await {
                    Ok(Some(record)) => DbError::Core(CoreError::InsufficientStock {
                        product_id: reservation.product_id.clone(),
                        available: record.current_stock,
                        requested: reservation.quantity,
                    }),
                    Ok(None) => DbError::not_found("Inventory", &reservation.product_id),
                    Err(e) => e,
                },
            );
        }

        sqlx::query("UPDATE reservations SET status = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(reservation_id)
            .bind(ReservationStatus::Committed)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let record =
            fetch_record_required(&mut tx, &reservation.product_id, &reservation.store_id).await?;
        let movement = StockMovement {
            kind: StockEntryKind::Out,
            quantity: -reservation.quantity,
            reason: None,
            reference: Some(reservation.order_id.clone()),
        };
        insert_stock_entry(&mut tx, &record.id, &movement, actor_id, now).await?;

        tx.commit().await?;

        reservation.status = ReservationStatus::Committed;
        reservation.updated_at = now;
        Ok((reservation, record))
    }

    /// Releases a hold back to the pool.
    ///
    /// Safe to call twice: a reservation that is no longer held is returned
    /// unchanged and the counter is left alone.
    pub async fn release(&self, reservation_id: &str) -> DbResult<Reservation> {
        self.settle(reservation_id, ReservationStatus::Released).await
    }

    /// Expires a hold. Same counter math as release, different final status
    /// so the audit trail shows why the stock came back.
    pub async fn expire(&self, reservation_id: &str) -> DbResult<Reservation> {
        self.settle(reservation_id, ReservationStatus::Expired).await
    }

    /// Releases every held reservation for an order. Returns the settled
    /// rows; orders with nothing held yield an empty list.
    pub async fn release_for_order(&self, order_id: &str) -> DbResult<Vec<Reservation>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM reservations \
             WHERE order_id = ?1 AND status = 'held'"
        );
        let mut held = sqlx::query_as::<_, Reservation>(&sql)
            .bind(order_id)
            .fetch_all(&mut *tx)
            .await?;

        for reservation in &mut held {
            sqlx::query("UPDATE reservations SET status = ?2, updated_at = ?3 WHERE id = ?1")
                .bind(&reservation.id)
                .bind(ReservationStatus::Released)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            release_counter(
                &mut tx,
                &reservation.product_id,
                &reservation.store_id,
                reservation.quantity,
            )
            .await?;

            reservation.status = ReservationStatus::Released;
            reservation.updated_at = now;
        }

        tx.commit().await?;

        if !held.is_empty() {
            debug!(order_id = %order_id, count = held.len(), "Released reservations for order");
        }
        Ok(held)
    }

    async fn settle(
        &self,
        reservation_id: &str,
        target: ReservationStatus,
    ) -> DbResult<Reservation> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let mut reservation = fetch_reservation(&mut tx, reservation_id)
            .await?
            .ok_or_else(|| DbError::not_found("Reservation", reservation_id))?;

        if !reservation.is_held() {
            // Already settled; there is nothing to put back.
            return Ok(reservation);
        }

        let result =
            sqlx::query("UPDATE reservations SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status = 'held'")
                .bind(reservation_id)
                .bind(target)
                .bind(now)
                .execute(&mut *tx)
                .await?;

        if result.rows_affected() == 0 {
            // Raced with another settle between the read and the write.
            return Ok(reservation);
        }

        release_counter(
            &mut tx,
            &reservation.product_id,
            &reservation.store_id,
            reservation.quantity,
        )
        .await?;

        tx.commit().await?;

        reservation.status = target;
        reservation.updated_at = now;
        Ok(reservation)
    }
}

async fn fetch_reservation(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    id: &str,
) -> DbResult<Option<Reservation>> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM reservations WHERE id = ?1");
    let reservation = sqlx::query_as::<_, Reservation>(&sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(reservation)
}

/// Gives reserved units back to the pool, clamped at zero like the domain
/// rule, so a stray double settle can never drive the counter negative.
async fn release_counter(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    product_id: &str,
    store_id: &str,
    quantity: i64,
) -> DbResult<()> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE inventory SET
            reserved_stock = MAX(0, reserved_stock - ?3),
            version = version + 1,
            updated_at = ?4
        WHERE product_id = ?1 AND store_id = ?2
        "#,
    )
    .bind(product_id)
    .bind(store_id)
    .bind(quantity)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Inventory", product_id));
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
    use meridian_core::{StockStatus, DEFAULT_STORE_ID};

    async fn db_with_stock(initial: i64) -> (Database, String) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = db.products().create("Widget", "tools", 1_000, 0).await.unwrap();
        db.inventory()
            .create(&product.id, DEFAULT_STORE_ID, 10, 1_000, 20, 100)
            .await
            .unwrap();
        if initial > 0 {
            db.inventory()
                .add_stock(&product.id, DEFAULT_STORE_ID, initial, None, None, None)
                .await
                .unwrap();
        }
        (db, product.id)
    }

    #[tokio::test]
    async fn test_reserve_checks_available_stock() {
        let (db, product_id) = db_with_stock(10).await;
        let repo = db.reservations();

        repo.reserve("ord-1", &product_id, DEFAULT_STORE_ID, 7, 30)
            .await
            .unwrap();

        // 3 available; asking for 4 fails with the live numbers.
        let err = repo
            .reserve("ord-2", &product_id, DEFAULT_STORE_ID, 4, 30)
            .await
            .unwrap_err();
        match err {
            DbError::Core(CoreError::InsufficientStock {
                available,
                requested,
                ..
            }) => {
                assert_eq!(available, 3);
                assert_eq!(requested, 4);
            }
            other => panic!("expected InsufficientStock, got {other}"),
        }

        // Reservations do not touch physical stock.
        let record = db
            .inventory()
            .get_for_product(&product_id, DEFAULT_STORE_ID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.current_stock, 10);
        assert_eq!(record.reserved_stock, 7);
    }

    #[tokio::test]
    async fn test_release_returns_stock_and_is_idempotent() {
        let (db, product_id) = db_with_stock(10).await;
        let repo = db.reservations();

        let r = repo
            .reserve("ord-1", &product_id, DEFAULT_STORE_ID, 4, 30)
            .await
            .unwrap();

        let released = repo.release(&r.id).await.unwrap();
        assert_eq!(released.status, ReservationStatus::Released);

        // Double release: no error, counter untouched.
        let again = repo.release(&r.id).await.unwrap();
        assert_eq!(again.status, ReservationStatus::Released);

        let record = db
            .inventory()
            .get_for_product(&product_id, DEFAULT_STORE_ID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.reserved_stock, 0);
        assert_eq!(record.current_stock, 10);
    }

    #[tokio::test]
    async fn test_commit_moves_both_counters_and_writes_ledger() {
        let (db, product_id) = db_with_stock(100).await;
        let repo = db.reservations();

        let r = repo
            .reserve("order123", &product_id, DEFAULT_STORE_ID, 30, 30)
            .await
            .unwrap();

        let (settled, record) = repo.commit(&r.id, Some("system")).await.unwrap();
        assert_eq!(settled.status, ReservationStatus::Committed);
        assert_eq!(record.current_stock, 70);
        assert_eq!(record.reserved_stock, 0);
        assert_eq!(record.available_stock(), 70);
        assert_eq!(record.status, StockStatus::InStock);

        let history = db.inventory().get_history(&record.id, 10).await.unwrap();
        let out = history
            .iter()
            .find(|e| e.kind == StockEntryKind::Out)
            .unwrap();
        assert_eq!(out.quantity, -30);
        assert_eq!(out.reference.as_deref(), Some("order123"));

        // A committed reservation cannot settle again.
        let err = repo.commit(&r.id, None).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Core(CoreError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_release_for_order_settles_all_holds() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let a = db.products().create("A", "x", 100, 0).await.unwrap();
        let b = db.products().create("B", "x", 100, 0).await.unwrap();
        for p in [&a, &b] {
            db.inventory()
                .create(&p.id, DEFAULT_STORE_ID, 1, 100, 2, 10)
                .await
                .unwrap();
            db.inventory()
                .add_stock(&p.id, DEFAULT_STORE_ID, 10, None, None, None)
                .await
                .unwrap();
        }
        let repo = db.reservations();
        repo.reserve("ord-1", &a.id, DEFAULT_STORE_ID, 2, 30).await.unwrap();
        repo.reserve("ord-1", &b.id, DEFAULT_STORE_ID, 3, 30).await.unwrap();
        repo.reserve("ord-2", &a.id, DEFAULT_STORE_ID, 1, 30).await.unwrap();

        let released = repo.release_for_order("ord-1").await.unwrap();
        assert_eq!(released.len(), 2);

        // ord-2's hold survives.
        let record = db
            .inventory()
            .get_for_product(&a.id, DEFAULT_STORE_ID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.reserved_stock, 1);

        assert!(repo.release_for_order("ord-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expiry_listing_and_sweep() {
        let (db, product_id) = db_with_stock(10).await;
        let repo = db.reservations();

        // TTL of zero minutes expires immediately.
        let r = repo
            .reserve("ord-1", &product_id, DEFAULT_STORE_ID, 2, 0)
            .await
            .unwrap();
        repo.reserve("ord-2", &product_id, DEFAULT_STORE_ID, 2, 60)
            .await
            .unwrap();

        let expired = repo.list_expired(10).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, r.id);

        let swept = repo.expire(&r.id).await.unwrap();
        assert_eq!(swept.status, ReservationStatus::Expired);

        let record = db
            .inventory()
            .get_for_product(&product_id, DEFAULT_STORE_ID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.reserved_stock, 2); // only the live hold remains
        assert!(repo.list_expired(10).await.unwrap().is_empty());
    }
}
