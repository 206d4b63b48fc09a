//! # Notifications
//!
//! Fire-and-forget messages triggered by order, delivery, and payment
//! transitions.
//!
//! Notifications are written in the same transaction as the transition that
//! caused them and dispatched later by a background relay (outbox pattern).
//! A failed dispatch never fails or rolls back the transition; the relay
//! keeps retrying up to its attempt cap and records the last error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Kind and Priority
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum NotificationKind {
    OrderPlaced,
    OrderCancelled,
    DeliveryUpdate,
    PaymentReceived,
    PaymentFailed,
    RefundCompleted,
    /// Admin-facing: a product hit its reorder point.
    StockAlert,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::OrderPlaced => write!(f, "order_placed"),
            NotificationKind::OrderCancelled => write!(f, "order_cancelled"),
            NotificationKind::DeliveryUpdate => write!(f, "delivery_update"),
            NotificationKind::PaymentReceived => write!(f, "payment_received"),
            NotificationKind::PaymentFailed => write!(f, "payment_failed"),
            NotificationKind::RefundCompleted => write!(f, "refund_completed"),
            NotificationKind::StockAlert => write!(f, "stock_alert"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
    Urgent,
}

// =============================================================================
// Notification
// =============================================================================

/// A stored notification, including its outbox bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub order_id: Option<String>,
    pub priority: NotificationPriority,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    /// Set once the relay hands the message to a sink.
    pub dispatched_at: Option<DateTime<Utc>>,
    /// Dispatch attempts so far.
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    #[inline]
    pub fn is_dispatched(&self) -> bool {
        self.dispatched_at.is_some()
    }

    pub fn mark_read(&mut self, now: DateTime<Utc>) {
        if !self.is_read {
            self.is_read = true;
            self.read_at = Some(now);
        }
    }
}

/// Payload for inserting a notification. Id and timestamp are minted by the
/// storage layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub order_id: Option<String>,
    pub priority: NotificationPriority,
}

impl NewNotification {
    pub fn new(
        user_id: impl Into<String>,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        NewNotification {
            user_id: user_id.into(),
            kind,
            title: title.into(),
            message: message.into(),
            order_id: None,
            priority: NotificationPriority::Medium,
        }
    }

    pub fn with_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_builder() {
        let n = NewNotification::new(
            "user-1",
            NotificationKind::OrderPlaced,
            "Order placed",
            "Your order is confirmed.",
        )
        .with_order("ord-1")
        .with_priority(NotificationPriority::High);

        assert_eq!(n.order_id.as_deref(), Some("ord-1"));
        assert_eq!(n.priority, NotificationPriority::High);
    }

    #[test]
    fn test_mark_read_once() {
        let now = Utc::now();
        let mut n = Notification {
            id: "n-1".to_string(),
            user_id: "user-1".to_string(),
            kind: NotificationKind::DeliveryUpdate,
            title: "On the way".to_string(),
            message: "Out for delivery.".to_string(),
            order_id: None,
            priority: NotificationPriority::Medium,
            is_read: false,
            read_at: None,
            dispatched_at: None,
            attempts: 0,
            last_error: None,
            created_at: now,
        };

        n.mark_read(now);
        assert!(n.is_read);
        assert_eq!(n.read_at, Some(now));

        // Re-reading does not move the timestamp.
        n.mark_read(now + Duration::minutes(5));
        assert_eq!(n.read_at, Some(now));
    }

    #[test]
    fn test_kind_serde() {
        assert_eq!(
            serde_json::to_string(&NotificationKind::StockAlert).unwrap(),
            "\"stock_alert\""
        );
        let kind: NotificationKind = serde_json::from_str("\"payment_failed\"").unwrap();
        assert_eq!(kind, NotificationKind::PaymentFailed);
    }
}
