//! Webhook Failover Notifier
//!
//! Implements FailoverNotifier with a one-shot JSON POST.

use crate::domain::entities::FailoverEvent;
use crate::domain::ports::{FailoverNotifier, NotificationError};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Body posted to the webhook.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverNotification {
    /// Always "failover"
    pub event: &'static str,
    /// ms since epoch
    pub timestamp: u64,
    pub promoted_replica: Option<usize>,
    pub message: String,
}

impl FailoverNotification {
    /// Body for a completed promotion.
    pub fn from_event(event: &FailoverEvent) -> Self {
        let message = format!(
            "Database failover: {} promoted to primary, replacing {}",
            event.new_primary.as_deref().unwrap_or("replica"),
            event.previous_primary
        );

        Self {
            event: "failover",
            timestamp: event.timestamp,
            promoted_replica: event.promoted_replica,
            message,
        }
    }
}

/// Posts failover events to an HTTP endpoint.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::Request(format!("client error: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FailoverNotifier for WebhookNotifier {
    async fn notify(&self, event: &FailoverEvent) -> Result<(), NotificationError> {
        let body = FailoverNotification::from_event(event);

        match self.client.post(&self.url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(NotificationError::Status(resp.status().as_u16())),
            Err(e) => Err(NotificationError::Request(e.to_string())),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn event() -> FailoverEvent {
        FailoverEvent {
            id: uuid::Uuid::new_v4(),
            timestamp: 1_700_000_000_000,
            promoted_replica: Some(1),
            previous_primary: "db-primary".to_string(),
            new_primary: Some("db-replica-1".to_string()),
            duration_ms: 12,
            success: true,
            error: None,
        }
    }

    #[test]
    fn test_notification_body() {
        let body = FailoverNotification::from_event(&event());
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["event"], "failover");
        assert_eq!(json["timestamp"], 1_700_000_000_000u64);
        assert_eq!(json["promotedReplica"], 1);
        assert_eq!(
            json["message"],
            "Database failover: db-replica-1 promoted to primary, replacing db-primary"
        );
    }

    #[tokio::test]
    async fn test_unreachable_target() {
        let notifier =
            WebhookNotifier::new("http://127.0.0.1:59997/hook", Duration::from_millis(200)).unwrap();
        let result = notifier.notify(&event()).await;
        assert!(matches!(result, Err(NotificationError::Request(_))));
    }
}
