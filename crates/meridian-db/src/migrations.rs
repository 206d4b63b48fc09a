//! # Database Migrations
//!
//! Embedded schema migrations, applied automatically on startup.
//!
//! ## Migration Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Migration Lifecycle                                  │
//! │                                                                         │
//! │  1. Database::new() called                                              │
//! │  2. Connection pool established                                         │
//! │  3. MIGRATOR.run() executes pending migrations in order                 │
//! │  4. _sqlx_migrations table tracks applied versions                      │
//! │  5. Database ready for queries                                          │
//! │                                                                         │
//! │  Migrations are embedded in the binary at compile time,                 │
//! │  so deployments carry their schema with them.                           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//! - Migrations are append-only: never edit an applied migration
//! - Each migration must be idempotent-safe within a transaction
//! - Version numbers are the leading digits of the filename

use sqlx::migrate::Migrator;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Embedded migrator, built from `migrations/sqlite/` at compile time.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending migrations against the given pool.
///
/// Safe to call on every startup: already-applied versions are skipped.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Running database migrations");

    MIGRATOR.run(pool).await?;

    let applied = applied_count(pool).await?;
    info!(applied, "Migrations complete");

    Ok(())
}

/// Number of migrations recorded as applied.
pub async fn applied_count(pool: &SqlitePool) -> DbResult<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?;
    Ok(count)
}

// =============================================================================
// Tests
// =============================================================================
