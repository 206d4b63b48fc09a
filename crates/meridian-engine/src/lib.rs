//! # meridian-engine: Service Layer for Meridian
//!
//! This crate wires the pure rules in `meridian-core` to the guarded writes
//! in `meridian-db` and exposes them as services an HTTP layer or admin tool
//! can call. It also owns the two background loops that keep the data
//! honest: the reservation sweeper and the notification relay.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Engine Architecture                             │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      Engine (service bundle)                     │  │
//! │  │                                                                  │  │
//! │  │  Built once at startup from a Database and an EngineConfig      │  │
//! │  │  start() spawns the background loops as Tokio tasks             │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌──────────┬──────────┼──────────────┬─────────────┐           │
//! │         ▼          ▼          ▼              ▼             ▼           │
//! │  ┌───────────┐ ┌────────┐ ┌────────────┐ ┌──────────┐ ┌───────────┐   │
//! │  │ Checkout  │ │ Stock  │ │Fulfillment │ │ Payments │ │Background │   │
//! │  │           │ │        │ │            │ │          │ │           │   │
//! │  │ place,    │ │ intake,│ │ deliveries,│ │ settle,  │ │ Relay:    │   │
//! │  │ cancel,   │ │ write- │ │ couriers,  │ │ retry,   │ │ queued    │   │
//! │  │ accept +  │ │ offs,  │ │ cascades   │ │ refund   │ │ notes out │   │
//! │  │ commit    │ │ alerts │ │ to orders, │ │ desk     │ │ Sweeper:  │   │
//! │  │ holds     │ │        │ │ ratings    │ │          │ │ lapsed    │   │
//! │  │           │ │        │ │            │ │          │ │ holds back│   │
//! │  └───────────┘ └────────┘ └────────────┘ └──────────┘ └───────────┘   │
//! │                                                                         │
//! │  STOCK CONSISTENCY CONTRACT:                                           │
//! │  • available  = on-hand − reserved, floored at zero                    │
//! │  • a hold is the only path from checkout to the ledger                 │
//! │  • every on-hand movement leaves a stock history entry                 │
//! │  • reserved counters never go negative, releases clamp                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`checkout`] - Order placement saga, cancellation, acceptance
//! - [`config`] - Engine configuration (store, tax, TTLs, relay cadence)
//! - [`error`] - Engine error type wrapping domain and storage errors
//! - [`fulfillment`] - Delivery tracking, courier progress, ratings
//! - [`notify`] - Notification relay and delivery sinks
//! - [`payments`] - Gateway settlement, retries, refund desk
//! - [`stock`] - Back-office stock ledger operations and reorder alerts
//! - [`sweep`] - Background sweeper that expires lapsed reservations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meridian_engine::{Engine, EngineConfig, LogSink};
//! use meridian_db::{Database, DbConfig};
//! use std::sync::Arc;
//!
//! let db = Arc::new(Database::new(DbConfig::default()).await?);
//! let config = EngineConfig::load_or_default(None);
//!
//! let mut engine = Engine::new(db, config);
//! engine.start(Arc::new(LogSink));
//!
//! // Serve requests through engine.checkout, engine.stock, ...
//!
//! engine.shutdown().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod checkout;
pub mod config;
pub mod error;
pub mod fulfillment;
pub mod notify;
pub mod payments;
pub mod stock;
pub mod sweep;

// =============================================================================
// Re-exports
// =============================================================================

pub use checkout::{CartLine, CheckoutRequest, CheckoutService, PlacedOrder};
pub use config::{
    CheckoutSettings, EngineConfig, NotificationSettings, ReservationSettings, StoreSettings,
};
pub use error::{EngineError, EngineResult};
pub use fulfillment::FulfillmentService;
pub use notify::{LogSink, NotificationRelay, NotificationRelayHandle, NotificationSink};
pub use payments::PaymentsService;
pub use stock::StockService;
pub use sweep::{ReservationSweeper, ReservationSweeperHandle};

use meridian_db::Database;
use std::sync::Arc;
use tracing::{info, warn};

// =============================================================================
// Engine
// =============================================================================

/// The assembled service layer.
///
/// Construction is cheap and synchronous; nothing runs until [`start`]
/// spawns the background loops. Services share the database pool and the
/// configuration through `Arc`, so the bundle can be cloned into request
/// handlers piecemeal.
///
/// [`start`]: Engine::start
pub struct Engine {
    pub checkout: CheckoutService,
    pub stock: StockService,
    pub fulfillment: FulfillmentService,
    pub payments: PaymentsService,
    db: Arc<Database>,
    config: Arc<EngineConfig>,
    relay: Option<NotificationRelayHandle>,
    sweeper: Option<ReservationSweeperHandle>,
}

impl Engine {
    /// Builds the service bundle. Background loops are not started.
    pub fn new(db: Arc<Database>, config: EngineConfig) -> Self {
        let config = Arc::new(config);
        Engine {
            checkout: CheckoutService::new(db.clone(), config.clone()),
            stock: StockService::new(db.clone(), config.clone()),
            fulfillment: FulfillmentService::new(db.clone()),
            payments: PaymentsService::new(db.clone()),
            db,
            config,
            relay: None,
            sweeper: None,
        }
    }

    /// Spawns the notification relay and the reservation sweeper.
    ///
    /// Queued notifications flow to `sink`; lapsed holds flow back to the
    /// stock counters. Calling this twice is a no-op.
    pub fn start(&mut self, sink: Arc<dyn NotificationSink>) {
        if self.relay.is_some() || self.sweeper.is_some() {
            warn!("Engine background tasks already started");
            return;
        }

        let (relay, relay_handle) =
            NotificationRelay::new(self.db.clone(), self.config.clone(), sink);
        tokio::spawn(relay.run());
        self.relay = Some(relay_handle);

        let (sweeper, sweeper_handle) =
            ReservationSweeper::new(self.db.clone(), self.config.clone());
        tokio::spawn(sweeper.run());
        self.sweeper = Some(sweeper_handle);

        info!(store = %self.config.store.name, "Engine started");
    }

    /// Signals both background loops to stop after their current cycle.
    pub async fn shutdown(&self) -> EngineResult<()> {
        if let Some(relay) = &self.relay {
            relay.shutdown().await?;
        }
        if let Some(sweeper) = &self.sweeper {
            sweeper.shutdown().await?;
        }
        info!("Engine shutdown signalled");
        Ok(())
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }
}

// =============================================================================
// Tests
// =============================================================================
