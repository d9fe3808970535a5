//! Notifications sent to users when a recurring rule creates a transaction.
//!
//! Delivery is best-effort: a failed notification is logged and never undoes
//! the transaction it is about.

use async_trait::async_trait;

use crate::{recurring::RecurringRule, transaction::Transaction, user::UserId};

/// The errors that may occur while delivering a notification.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NotificationError {
    /// The notification channel rejected or failed to deliver the message.
    #[error("could not deliver the notification: {0}")]
    Delivery(String),
}

/// Delivers notifications to users.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tell `user_id` that `rule` created `transaction`.
    async fn notify_rule_run(
        &self,
        user_id: UserId,
        rule: &RecurringRule,
        transaction: &Transaction,
    ) -> Result<(), NotificationError>;
}

/// A [Notifier] that writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_rule_run(
        &self,
        user_id: UserId,
        rule: &RecurringRule,
        transaction: &Transaction,
    ) -> Result<(), NotificationError> {
        tracing::info!(
            "Notifying user {user_id}: recurring rule \"{}\" created a {} of {:.2} on {}",
            rule.title,
            transaction.transaction_type.as_str().to_lowercase(),
            transaction.amount,
            transaction.date
        );

        Ok(())
    }
}
