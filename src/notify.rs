use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::Booking;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A guest submitted a request; goes to the resource administrator.
    Received,
    Approved,
    Rejected,
}

impl NotificationKind {
    pub fn label(&self) -> &'static str {
        match self {
            NotificationKind::Received => "received",
            NotificationKind::Approved => "approved",
            NotificationKind::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub recipient: String,
    pub booking: Booking,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Outbound message channel (email in production).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: &Notification) -> Result<(), NotifyError> {
        info!(
            kind = n.kind.label(),
            recipient = %n.recipient,
            booking = %n.booking.id,
            "notification"
        );
        Ok(())
    }
}

/// Fire-and-forget dispatch to a `Notifier`.
///
/// Every notification runs on its own task; failures are logged and counted,
/// never returned to the lifecycle operation that produced them.
pub struct NotifyHub {
    notifier: Arc<dyn Notifier>,
    /// Fallback recipient for `Received` when the resource has no contact.
    admin_email: Option<String>,
}

impl NotifyHub {
    pub fn new(notifier: Arc<dyn Notifier>, admin_email: Option<String>) -> Self {
        Self { notifier, admin_email }
    }

    /// Hub that only logs. Used when no delivery channel is configured.
    pub fn logging() -> Self {
        Self::new(Arc::new(LogNotifier), None)
    }

    pub fn booking_received(&self, booking: &Booking, resource_contact: Option<&str>) {
        let recipient = resource_contact.or(self.admin_email.as_deref());
        match recipient {
            Some(r) => self.dispatch(NotificationKind::Received, r.to_string(), booking),
            None => debug!(booking = %booking.id, "no administrator recipient, skipping notification"),
        }
    }

    pub fn booking_approved(&self, booking: &Booking) {
        self.dispatch(NotificationKind::Approved, booking.guest.email.clone(), booking);
    }

    pub fn booking_rejected(&self, booking: &Booking) {
        self.dispatch(NotificationKind::Rejected, booking.guest.email.clone(), booking);
    }

    fn dispatch(&self, kind: NotificationKind, recipient: String, booking: &Booking) {
        let notification = Notification {
            kind,
            recipient,
            booking: booking.clone(),
        };
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            metrics::counter!(crate::observability::NOTIFICATIONS_TOTAL, "kind" => kind.label())
                .increment(1);
            if let Err(e) = notifier.notify(&notification).await {
                warn!(
                    kind = kind.label(),
                    booking = %notification.booking.id,
                    "notification dropped: {e}"
                );
                metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL, "kind" => kind.label())
                    .increment(1);
            }
        });
    }
}
