use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::persist::{NotificationMethod, Recipient, UserId};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("user {user_id} has no address for {method} notifications")]
    MissingAddress { method: NotificationMethod, user_id: UserId },

    #[error("no recipient for portfolio: {0}")]
    Recipient(String),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Sink for triggered-alert messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, method: NotificationMethod, recipient: &Recipient, message: &str) -> Result<(), NotifyError>;
}

/// Channels a notification is written to. Every alert lands on the
/// dashboard; email and SMS go out in addition to it.
pub fn channels(method: NotificationMethod) -> &'static [NotificationMethod] {
    match method {
        NotificationMethod::Email => &[NotificationMethod::Email, NotificationMethod::Dashboard],
        NotificationMethod::Sms => &[NotificationMethod::Sms, NotificationMethod::Dashboard],
        NotificationMethod::Dashboard => &[NotificationMethod::Dashboard],
    }
}

/// Writes every notification to the `notifications` tracing target. Stands in
/// for real email/SMS providers; the dashboard reads the same stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn dispatch(&self, method: NotificationMethod, recipient: &Recipient, message: &str) -> Result<(), NotifyError> {
        if method == NotificationMethod::Email && recipient.email.is_none() {
            return Err(NotifyError::MissingAddress { method, user_id: recipient.user_id });
        }

        for channel in channels(method) {
            match channel {
                NotificationMethod::Email => {
                    let to = recipient.email.as_deref().unwrap_or_default();
                    info!(target: "notifications", channel = "email", to, "{message}");
                }
                NotificationMethod::Sms => {
                    info!(target: "notifications", channel = "sms", user_id = recipient.user_id, "{message}");
                }
                NotificationMethod::Dashboard => {
                    info!(target: "notifications", channel = "dashboard", user_id = recipient.user_id, "{message}");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_email_requires_address() {
        let notifier = LogNotifier;
        let without = Recipient { user_id: 3, email: None };
        let with = Recipient { user_id: 3, email: Some("ada@example.com".into()) };

        assert!(matches!(
            notifier.dispatch(NotificationMethod::Email, &without, "hi").await,
            Err(NotifyError::MissingAddress { user_id: 3, .. })
        ));
        assert!(notifier.dispatch(NotificationMethod::Email, &with, "hi").await.is_ok());
        assert!(notifier.dispatch(NotificationMethod::Sms, &without, "hi").await.is_ok());
        assert!(notifier.dispatch(NotificationMethod::Dashboard, &without, "hi").await.is_ok());
    }

    #[test]
    fn test_every_method_also_reaches_dashboard() {
        for method in [NotificationMethod::Email, NotificationMethod::Sms, NotificationMethod::Dashboard] {
            let targets = channels(method);
            assert_eq!(targets[0], method);
            assert_eq!(targets.iter().filter(|c| **c == NotificationMethod::Dashboard).count(), 1);
        }
        assert_eq!(channels(NotificationMethod::Sms).len(), 2);
    }
}
