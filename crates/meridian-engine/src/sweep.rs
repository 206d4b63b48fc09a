//! # Reservation Sweeper
//!
//! Background task that expires stale stock holds so abandoned checkouts
//! hand their units back to available stock.
//!
//! A hold is created at order placement and normally settles when the order
//! is accepted for processing (committed) or cancelled (released). When
//! neither happens before the hold's TTL runs out, the sweeper expires it:
//! the reserved counter drops, available stock rises, and the reservation
//! row keeps status `expired` for the audit trail.

use meridian_db::Database;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// Expires overdue stock holds on an interval.
pub struct ReservationSweeper {
    db: Arc<Database>,
    config: Arc<EngineConfig>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for signalling the sweeper to stop.
#[derive(Clone)]
pub struct ReservationSweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl ReservationSweeperHandle {
    /// Signals the sweeper to shut down after its current cycle.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| EngineError::ChannelError("reservation sweeper already stopped".into()))
    }
}

impl ReservationSweeper {
    /// Creates a sweeper and its shutdown handle.
    pub fn new(db: Arc<Database>, config: Arc<EngineConfig>) -> (Self, ReservationSweeperHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (
            ReservationSweeper {
                db,
                config,
                shutdown_rx,
            },
            ReservationSweeperHandle { shutdown_tx },
        )
    }

    /// Runs the sweeper until shutdown is signalled.
    pub async fn run(mut self) {
        info!(
            sweep_interval_secs = self.config.reservations.sweep_interval_secs,
            ttl_minutes = self.config.reservations.ttl_minutes,
            "Reservation sweeper starting"
        );

        let mut tick = tokio::time::interval(Duration::from_secs(
            self.config.reservations.sweep_interval_secs,
        ));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.sweep_batch().await {
                        Ok(0) => {}
                        Ok(expired) => {
                            info!(expired, "Expired stale stock holds");
                        }
                        Err(e) => {
                            error!(error = %e, "Reservation sweep failed");
                        }
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Reservation sweeper shutting down");
                    break;
                }
            }
        }

        info!("Reservation sweeper stopped");
    }

    /// One sweep cycle: expire every overdue hold in the batch.
    ///
    /// A hold that settles concurrently (the order was accepted or cancelled
    /// between the list and the expire) is skipped, not an error.
    async fn sweep_batch(&self) -> EngineResult<usize> {
        let overdue = self
            .db
            .reservations()
            .list_expired(self.config.reservations.sweep_batch_size)
            .await?;

        if overdue.is_empty() {
            return Ok(0);
        }

        debug!(count = overdue.len(), "Sweeping overdue reservations");

        let mut expired = 0;
        for reservation in &overdue {
            match self.db.reservations().expire(&reservation.id).await {
                Ok(settled) => {
                    debug!(
                        reservation_id = %settled.id,
                        order_id = %settled.order_id,
                        product_id = %settled.product_id,
                        quantity = settled.quantity,
                        "Expired stock hold"
                    );
                    expired += 1;
                }
                Err(e) => {
                    warn!(
                        reservation_id = %reservation.id,
                        order_id = %reservation.order_id,
                        error = %e,
                        "Skipping reservation settled by another worker"
                    );
                }
            }
        }

        Ok(expired)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
