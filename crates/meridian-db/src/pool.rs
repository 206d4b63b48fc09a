//! # Connection Pool Management
//!
//! SQLite connection pool setup and the [`Database`] handle that the rest of
//! the system works through.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Database Handle                                      │
//! │                                                                         │
//! │  ┌───────────────┐                                                      │
//! │  │   Database    │  Cheap to clone: wraps an Arc'd pool                 │
//! │  │               │                                                      │
//! │  │  .products()  │──► ProductRepository                                 │
//! │  │  .inventory() │──► InventoryRepository                               │
//! │  │  .orders()    │──► OrderRepository                                   │
//! │  │  ...          │                                                      │
//! │  └───────┬───────┘                                                      │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  ┌───────────────┐     ┌─────────────────┐                              │
//! │  │  SqlitePool   │────►│  store.db (WAL) │                              │
//! │  └───────────────┘     └─────────────────┘                              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## SQLite Settings
//! - WAL journal mode: readers don't block the writer
//! - `synchronous = NORMAL`: safe with WAL, much faster than FULL
//! - `foreign_keys = ON`: SQLite defaults them off per-connection
//! - `busy_timeout`: writers wait instead of failing immediately

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::migrations::run_migrations;
use crate::repository::{
    CouponRepository, DeliveryRepository, InventoryRepository, NotificationRepository,
    OrderRepository, PaymentRepository, ProductRepository, ReservationRepository,
};

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file, or `:memory:` for tests.
    pub path: PathBuf,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// How long to wait for a free connection before giving up.
    pub acquire_timeout: Duration,
    /// SQLite busy handler timeout for locked writes.
    pub busy_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("meridian.db"),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl DbConfig {
    /// Config pointing at a database file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// In-memory database for tests.
    ///
    /// Forces a single connection: each connection to `:memory:` would
    /// otherwise get its own private database.
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            max_connections: 1,
            ..Self::default()
        }
    }

    /// Sets the pool size.
    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    /// Sets the pool acquire timeout.
    pub fn acquire_timeout(mut self, d: Duration) -> Self {
        self.acquire_timeout = d;
        self
    }

    fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == ":memory:"
    }
}

/// Handle to the database: owns the pool, hands out repositories.
///
/// Clone freely. All clones share the same underlying pool.
///
/// ## Example
/// ```no_run
/// use meridian_db::{Database, DbConfig};
///
/// # async fn demo() -> Result<(), meridian_db::DbError> {
/// let db = Database::new(DbConfig::new("store.db")).await?;
/// let product = db.products().get_by_id("some-id").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the database, configures SQLite, and applies pending migrations.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        let options = if config.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
        } else {
            SqliteConnectOptions::new()
                .filename(&config.path)
                .create_if_missing(true)
        }
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        run_migrations(&pool).await?;

        info!(
            path = %config.path.display(),
            max_connections = config.max_connections,
            "Database ready"
        );

        Ok(Self { pool })
    }

    /// The underlying pool, for migrations and ad-hoc queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Product catalog repository.
    pub fn products(&self) -> ProductRepository {
        ProductRepository::new(self.pool.clone())
    }

    /// Inventory ledger repository.
    pub fn inventory(&self) -> InventoryRepository {
        InventoryRepository::new(self.pool.clone())
    }

    /// Stock reservation repository.
    pub fn reservations(&self) -> ReservationRepository {
        ReservationRepository::new(self.pool.clone())
    }

    /// Coupon repository.
    pub fn coupons(&self) -> CouponRepository {
        CouponRepository::new(self.pool.clone())
    }

    /// Order repository.
    pub fn orders(&self) -> OrderRepository {
        OrderRepository::new(self.pool.clone())
    }

    /// Delivery tracking repository.
    pub fn deliveries(&self) -> DeliveryRepository {
        DeliveryRepository::new(self.pool.clone())
    }

    /// Payment repository.
    pub fn payments(&self) -> PaymentRepository {
        PaymentRepository::new(self.pool.clone())
    }

    /// Notification outbox repository.
    pub fn notifications(&self) -> NotificationRepository {
        NotificationRepository::new(self.pool.clone())
    }

    /// Verifies the database is reachable.
    pub async fn health_check(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Closes the pool. Outstanding connections finish their work first.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// =============================================================================
// Tests
// =============================================================================
