//! # Meridian Database Layer
//!
//! SQLite persistence for the stock and order-lifecycle engine.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         meridian-db                                     │
//! │                                                                         │
//! │  ┌─────────────┐   ┌──────────────────────────────────────────────┐     │
//! │  │   Database  │──►│              Repositories                    │     │
//! │  │  (pool.rs)  │   │                                              │     │
//! │  └─────────────┘   │  products      catalog rows                  │     │
//! │         │          │  inventory     stock ledger + entries        │     │
//! │         ▼          │  reservations  holds + commit/release        │     │
//! │  ┌─────────────┐   │  coupons       codes + atomic redemption     │     │
//! │  │ Migrations  │   │  orders        orders + items + lifecycle    │     │
//! │  │ (embedded)  │   │  deliveries    tracking + event log          │     │
//! │  └─────────────┘   │  payments      settlement + refunds          │     │
//! │                    │  notifications transactional outbox          │     │
//! │                    └──────────────────────────────────────────────┘     │
//! │                                                                         │
//! │  Write pattern: load row → mutate via meridian-core → persist in a      │
//! │  transaction. Race-prone paths (stock, coupon counters) additionally    │
//! │  re-check their guard in the UPDATE's WHERE clause.                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Responsibilities
//! - Connection pool and SQLite pragmas
//! - Schema migrations (embedded, run on startup)
//! - CRUD repositories for every aggregate
//! - Transactional writes that keep counters, ledgers, and the
//!   notification outbox consistent
//!
//! ## NOT Responsible For
//! - Business rules (meridian-core)
//! - Orchestration across aggregates (meridian-engine)

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// Re-export main types for convenience
pub use error::{DbError, DbResult};
pub use migrations::{run_migrations, MIGRATOR};
pub use pool::{Database, DbConfig};
pub use repository::{
    CouponRepository, DeliveryRepository, InventoryRepository, NewCoupon, NewOrder, NewOrderLine,
    NotificationRepository, OrderRepository, PaymentRepository, ProductRepository,
    ReservationRepository,
};
