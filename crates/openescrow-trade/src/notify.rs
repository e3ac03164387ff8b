//! Outbound notifications.
//!
//! Notifications are sent after a commit and are fire-and-forget: a failing
//! [`Notifier`] is logged and never rolls anything back.

use std::sync::Mutex;

use openescrow_types::{OrderId, Result, UserId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderCreated,
    PaymentMarked,
    CryptoReleased,
    OrderCancelled,
    OrderExpired,
    DisputeOpened,
    DisputeResolved,
    /// A line posted into the order's chat by the system.
    SystemMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// `None` addresses the order chat rather than a single user.
    pub recipient: Option<UserId>,
    pub order_id: OrderId,
    pub kind: NotificationKind,
    pub message: String,
}

impl Notification {
    #[must_use]
    pub fn to_user(
        recipient: UserId,
        order_id: OrderId,
        kind: NotificationKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient: Some(recipient),
            order_id,
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn system(order_id: OrderId, message: impl Into<String>) -> Self {
        Self {
            recipient: None,
            order_id,
            kind: NotificationKind::SystemMessage,
            message: message.into(),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Deliver each notification, logging failures.
pub(crate) fn dispatch(notifier: &dyn Notifier, notifications: &[Notification]) {
    for n in notifications {
        if let Err(err) = notifier.notify(n) {
            warn!(
                order_id = %n.order_id,
                kind = ?n.kind,
                error = %err,
                "notification delivery failed"
            );
        }
    }
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: &Notification) -> Result<()> {
        info!(
            recipient = ?n.recipient,
            order_id = %n.order_id,
            kind = ?n.kind,
            message = %n.message,
            "notification"
        );
        Ok(())
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn sent_to(&self, user: UserId) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.recipient == Some(user))
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(notification.clone());
        Ok(())
    }
}
