//! Failover Notifier Port
//!
//! Defines the interface for announcing completed promotions to an
//! external target.

use crate::domain::entities::FailoverEvent;
use async_trait::async_trait;

/// Delivers failover notifications.
///
/// Delivery is one-shot: implementations must not retry, and callers never
/// propagate a delivery failure beyond logging it.
#[async_trait]
pub trait FailoverNotifier: Send + Sync {
    async fn notify(&self, event: &FailoverEvent) -> Result<(), NotificationError>;
}

/// Notification delivery errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NotificationError {
    #[error("notification request failed: {0}")]
    Request(String),
    #[error("notification target answered with status {0}")]
    Status(u16),
}
