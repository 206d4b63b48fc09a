//! # Notification Relay
//!
//! Background task that drains the notification outbox and pushes each
//! entry through a [`NotificationSink`].
//!
//! ## Relay Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Notification Relay Flow                            │
//! │                                                                         │
//! │  Every poll_interval_secs:                                              │
//! │                                                                         │
//! │  1. SELECT pending notifications (dispatched_at IS NULL,                │
//! │     attempts < max_attempts) ordered oldest first                       │
//! │                                                                         │
//! │  2. For each entry:                                                     │
//! │     ┌─────────────┐  delivered   ┌──────────────────────────┐           │
//! │     │ sink.deliver│ ───────────► │ mark_dispatched          │           │
//! │     │             │  failed      │                          │           │
//! │     │             │ ───────────► │ record_failure (+1)      │           │
//! │     └─────────────┘              └──────────────────────────┘           │
//! │                                                                         │
//! │  3. Entries at the attempt cap stay in the table unreplayed, visible    │
//! │     to operators, until the purge window removes dispatched rows.       │
//! │                                                                         │
//! │  Business transactions only ever INSERT notifications; delivery         │
//! │  failures can never roll back an order.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{Duration as ChronoDuration, Utc};
use meridian_core::Notification;
use meridian_db::Database;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// Seconds between purge passes over old dispatched rows.
const PURGE_INTERVAL_SECS: u64 = 3600;

// =============================================================================
// Notification Sink
// =============================================================================

/// Where relayed notifications go.
///
/// Production wires an email or push provider here; tests and development
/// use [`LogSink`]. A sink reports failure with a human-readable reason,
/// which the relay records on the notification row.
pub trait NotificationSink: Send + Sync {
    /// Pushes one notification to the outside world.
    fn deliver(&self, notification: &Notification) -> Result<(), String>;
}

/// Sink that writes notifications to the log and nothing else.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn deliver(&self, notification: &Notification) -> Result<(), String> {
        info!(
            kind = %notification.kind,
            user_id = %notification.user_id,
            title = %notification.title,
            "Notification dispatched"
        );
        Ok(())
    }
}

// =============================================================================
// Notification Relay
// =============================================================================

/// Drains the notification outbox on an interval.
pub struct NotificationRelay {
    db: Arc<Database>,
    config: Arc<EngineConfig>,
    sink: Arc<dyn NotificationSink>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for signalling the relay to stop.
#[derive(Clone)]
pub struct NotificationRelayHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl NotificationRelayHandle {
    /// Signals the relay to shut down after its current cycle.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| EngineError::ChannelError("notification relay already stopped".into()))
    }
}

impl NotificationRelay {
    /// Creates a relay and its shutdown handle.
    pub fn new(
        db: Arc<Database>,
        config: Arc<EngineConfig>,
        sink: Arc<dyn NotificationSink>,
    ) -> (Self, NotificationRelayHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (
            NotificationRelay {
                db,
                config,
                sink,
                shutdown_rx,
            },
            NotificationRelayHandle { shutdown_tx },
        )
    }

    /// Runs the relay until shutdown is signalled.
    pub async fn run(mut self) {
        info!(
            poll_interval_secs = self.config.notifications.poll_interval_secs,
            batch_size = self.config.notifications.batch_size,
            "Notification relay starting"
        );

        let mut poll = tokio::time::interval(Duration::from_secs(
            self.config.notifications.poll_interval_secs,
        ));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut purge = tokio::time::interval(Duration::from_secs(PURGE_INTERVAL_SECS));
        purge.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    match self.relay_batch().await {
                        Ok(0) => {}
                        Ok(dispatched) => {
                            debug!(dispatched, "Notification batch relayed");
                        }
                        Err(e) => {
                            error!(error = %e, "Notification relay cycle failed");
                        }
                    }
                }
                _ = purge.tick() => {
                    if let Err(e) = self.purge_old().await {
                        warn!(error = %e, "Notification purge failed");
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Notification relay shutting down");
                    break;
                }
            }
        }

        info!("Notification relay stopped");
    }

    /// One poll cycle: drain pending entries through the sink.
    ///
    /// Returns the number of notifications dispatched. A failed delivery
    /// bumps the row's attempt counter and moves on; it never aborts the
    /// rest of the batch.
    async fn relay_batch(&self) -> EngineResult<usize> {
        let pending = self
            .db
            .notifications()
            .list_pending(
                self.config.notifications.max_attempts,
                self.config.notifications.batch_size,
            )
            .await?;

        if pending.is_empty() {
            return Ok(0);
        }

        debug!(count = pending.len(), "Relaying pending notifications");

        let mut dispatched = 0;
        for notification in &pending {
            match self.sink.deliver(notification) {
                Ok(()) => {
                    self.db.notifications().mark_dispatched(&notification.id).await?;
                    dispatched += 1;
                }
                Err(reason) => {
                    warn!(
                        id = %notification.id,
                        kind = %notification.kind,
                        attempts = notification.attempts + 1,
                        error = %reason,
                        "Notification delivery failed"
                    );
                    self.db
                        .notifications()
                        .record_failure(&notification.id, &reason)
                        .await?;
                }
            }
        }

        Ok(dispatched)
    }

    /// Removes dispatched rows older than the purge window.
    async fn purge_old(&self) -> EngineResult<()> {
        let cutoff = Utc::now() - ChronoDuration::days(self.config.notifications.purge_after_days);
        let removed = self.db.notifications().purge_dispatched(cutoff).await?;
        if removed > 0 {
            debug!(removed, "Purged old dispatched notifications");
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::{NewNotification, NotificationKind};
    use meridian_db::DbConfig;
    use std::sync::Mutex;

    /// Sink that records deliveries, optionally failing every call.
    struct CollectingSink {
        delivered: Mutex<Vec<String>>,
        fail_with: Option<String>,
    }

    impl CollectingSink {
        fn working() -> Self {
            CollectingSink {
                delivered: Mutex::new(Vec::new()),
                fail_with: None,
            }
        }

        fn broken(reason: &str) -> Self {
            CollectingSink {
                delivered: Mutex::new(Vec::new()),
                fail_with: Some(reason.to_string()),
            }
        }

        fn titles(&self) -> Vec<String> {
            self.delivered.lock().unwrap().clone()
        }
    }

    impl NotificationSink for CollectingSink {
        fn deliver(&self, notification: &Notification) -> Result<(), String> {
            if let Some(reason) = &self.fail_with {
                return Err(reason.clone());
            }
            self.delivered
                .lock()
                .unwrap()
                .push(notification.title.clone());
            Ok(())
        }
    }

    async fn relay_fixture(
        sink: Arc<dyn NotificationSink>,
        max_attempts: i64,
    ) -> (NotificationRelay, NotificationRelayHandle, Arc<Database>) {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let mut config = EngineConfig::default();
        config.notifications.max_attempts = max_attempts;
        let (relay, handle) = NotificationRelay::new(db.clone(), Arc::new(config), sink);
        (relay, handle, db)
    }

    #[tokio::test]
    async fn test_relay_dispatches_pending_batch() {
        let sink = Arc::new(CollectingSink::working());
        let (relay, _handle, db) = relay_fixture(sink.clone(), 10).await;

        let repo = db.notifications();
        repo.enqueue(&NewNotification::new(
            "user-1",
            NotificationKind::OrderPlaced,
            "Order placed",
            "Your order was received.",
        ))
        .await
        .unwrap();
        repo.enqueue(&NewNotification::new(
            "user-2",
            NotificationKind::PaymentReceived,
            "Payment received",
            "Thanks!",
        ))
        .await
        .unwrap();

        let dispatched = relay.relay_batch().await.unwrap();
        assert_eq!(dispatched, 2);
        assert_eq!(sink.titles(), vec!["Order placed", "Payment received"]);
        assert_eq!(repo.pending_count().await.unwrap(), 0);

        // Nothing left on the next cycle.
        assert_eq!(relay.relay_batch().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_deliveries_accumulate_attempts_until_parked() {
        let sink = Arc::new(CollectingSink::broken("smtp unreachable"));
        let (relay, _handle, db) = relay_fixture(sink, 2).await;

        let repo = db.notifications();
        repo.enqueue(&NewNotification::new(
            "user-1",
            NotificationKind::PaymentFailed,
            "Payment failed",
            "Your card was declined.",
        ))
        .await
        .unwrap();

        // Two failing cycles reach the attempt cap.
        assert_eq!(relay.relay_batch().await.unwrap(), 0);
        assert_eq!(relay.relay_batch().await.unwrap(), 0);

        // Parked: no longer offered to the sink.
        let pending = repo.list_pending(2, 10).await.unwrap();
        assert!(pending.is_empty());

        // Still in the table for operators, with the failure recorded.
        let rows = repo.list_for_user("user-1", 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].attempts, 2);
        assert_eq!(rows[0].last_error.as_deref(), Some("smtp unreachable"));
        assert!(rows[0].dispatched_at.is_none());
    }

    #[tokio::test]
    async fn test_purge_removes_only_old_dispatched_rows() {
        let sink = Arc::new(CollectingSink::working());
        let (relay, _handle, db) = relay_fixture(sink, 10).await;

        let repo = db.notifications();
        repo.enqueue(&NewNotification::new(
            "user-1",
            NotificationKind::OrderPlaced,
            "Dispatched",
            "x",
        ))
        .await
        .unwrap();
        repo.enqueue(&NewNotification::new(
            "user-1",
            NotificationKind::OrderPlaced,
            "Still pending",
            "x",
        ))
        .await
        .unwrap();

        // Dispatch only the first.
        let pending = repo.list_pending(10, 1).await.unwrap();
        repo.mark_dispatched(&pending[0].id).await.unwrap();

        // Cutoff in the future removes everything already dispatched;
        // the pending row survives regardless.
        let removed = repo
            .purge_dispatched(Utc::now() + ChronoDuration::days(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(repo.pending_count().await.unwrap(), 1);

        // The relay's own purge uses a past cutoff, so fresh rows stay.
        relay.purge_old().await.unwrap();
        assert_eq!(repo.list_for_user("user-1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_the_run_loop() {
        let sink = Arc::new(CollectingSink::working());
        let (relay, handle, _db) = relay_fixture(sink, 10).await;

        let task = tokio::spawn(relay.run());
        handle.shutdown().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("relay did not stop after shutdown")
            .unwrap();

        // A second signal finds the channel closed.
        assert!(handle.shutdown().await.is_err());
    }
}
