//! Notification Reporter
//!
//! Every resolution failure or unrequested forwarding decision produces one
//! typed reply to the original sender, and one log line regardless of
//! whether that reply can be delivered.

use crate::router::Router;
use tracing::{debug, info, warn};
use types::{Envelope, Notification, NotificationKind, PLATFORM_SENDER};

impl Router {
    /// Log `notification` and route it back to the sender of `original`
    ///
    /// Notifications about notifications, and replies to anonymous or
    /// platform senders, are logged only.
    pub fn notify(&self, original: &Envelope, kind: NotificationKind, notification: Notification) {
        match kind {
            NotificationKind::Failure => warn!(
                code = ?notification.code,
                sender = %original.sender,
                recipient = ?original.recipient,
                detail = %notification.detail,
                "{}",
                notification.code.summary()
            ),
            NotificationKind::Information => info!(
                code = ?notification.code,
                sender = %original.sender,
                detail = %notification.detail,
                "{}",
                notification.code.summary()
            ),
        }

        if !should_reply(original) {
            debug!(code = ?notification.code, sender = %original.sender, "Notification not sent back");
            return;
        }
        if !self.is_running() {
            return;
        }
        self.route(original.notification_reply(kind, notification));
    }
}

fn should_reply(original: &Envelope) -> bool {
    !original.is_notification() && !original.sender.is_empty() && original.sender != PLATFORM_SENDER
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::NotificationCode;

    #[test]
    fn test_reply_suppression() {
        assert!(should_reply(&Envelope::new("alice")));
        assert!(!should_reply(&Envelope::new("")));
        assert!(!should_reply(&Envelope::new(PLATFORM_SENDER)));

        let failure = Envelope::new("alice").notification_reply(
            NotificationKind::Failure,
            Notification::new(NotificationCode::RecipientNotFoundLocal, "bob"),
        );
        // Sent by the platform and flagged as a notification
        assert!(!should_reply(&failure));
    }
}
