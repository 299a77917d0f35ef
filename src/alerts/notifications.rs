use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::models::{AlertEvent, Severity};
use crate::utils::format_timestamp;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NotificationError {
    #[error("notification request failed: {0}")]
    Http(String),

    #[error("notification endpoint returned status {0}")]
    Status(u16),
}

/// Delivery channel for newly created alerts. Failures are reported to the
/// caller, which logs them and moves on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &AlertEvent) -> Result<(), NotificationError>;

    /// Connectivity check
    async fn send_test(&self) -> Result<(), NotificationError>;
}

/// Posts Slack-compatible messages to an incoming webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::Http(e.to_string()))?;

        Ok(Self { client, url: url.into() })
    }

    async fn post(&self, payload: &Value) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| NotificationError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &AlertEvent) -> Result<(), NotificationError> {
        self.post(&alert_payload(event)).await?;

        tracing::info!(
            alert_id = event.alert_id,
            protocol = %event.protocol,
            alert_type = %event.alert_type,
            "Sent webhook notification"
        );
        Ok(())
    }

    async fn send_test(&self) -> Result<(), NotificationError> {
        self.post(&test_payload()).await?;
        tracing::info!("Test notification sent");
        Ok(())
    }
}

/// Writes alerts to the log. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &AlertEvent) -> Result<(), NotificationError> {
        tracing::warn!(
            alert_id = event.alert_id,
            protocol = %event.protocol,
            alert_type = %event.alert_type,
            severity = %event.severity,
            triggered_at = %event.triggered_at,
            "Alert triggered: {}",
            event.message
        );
        Ok(())
    }

    async fn send_test(&self) -> Result<(), NotificationError> {
        tracing::warn!("No webhook configured, test notification only logged");
        Ok(())
    }
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "#FF0000",
        Severity::Warning => "#FFA500",
        Severity::Info => "#0000FF",
    }
}

fn severity_emoji(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🚨",
        Severity::Warning => "⚠️",
        Severity::Info => "ℹ️",
    }
}

/// Slack attachment for one alert: header, summary fields, then the message.
pub fn alert_payload(event: &AlertEvent) -> Value {
    let severity = event.severity.as_str().to_uppercase();

    json!({
        "attachments": [{
            "color": severity_color(event.severity),
            "blocks": [
                {
                    "type": "header",
                    "text": {
                        "type": "plain_text",
                        "text": format!("{} {} Alert: {}", severity_emoji(event.severity), severity, event.protocol),
                        "emoji": true
                    }
                },
                {
                    "type": "section",
                    "fields": [
                        { "type": "mrkdwn", "text": format!("*Protocol:*\n{}", event.protocol) },
                        { "type": "mrkdwn", "text": format!("*Severity:*\n{}", severity) },
                        { "type": "mrkdwn", "text": format!("*Alert Type:*\n{}", event.alert_type) },
                        { "type": "mrkdwn", "text": format!("*Time:*\n{}", format_timestamp(&event.triggered_at)) }
                    ]
                },
                {
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": format!("*Details:*\n{}", event.message) }
                }
            ]
        }]
    })
}

fn test_payload() -> Value {
    json!({
        "text": "✅ protomon - webhook integration test",
        "blocks": [{
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": "Webhook integration is working. Alerts will be delivered here when anomalies are detected."
            }
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertType;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn event(severity: Severity) -> AlertEvent {
        AlertEvent {
            alert_id: 7,
            protocol: "aave-v3".to_string(),
            alert_type: AlertType::TvlDrop,
            severity,
            message: "TVL dropped 30.00% in 24h".to_string(),
            triggered_at: Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap(),
        }
    }

    #[derive(Clone)]
    struct HookState {
        status: StatusCode,
        received: Arc<Mutex<Vec<Value>>>,
    }

    async fn receive(State(state): State<HookState>, Json(body): Json<Value>) -> StatusCode {
        state.received.lock().push(body);
        state.status
    }

    /// Serve a webhook endpoint answering every post with `status`.
    async fn webhook_server(status: StatusCode) -> (String, Arc<Mutex<Vec<Value>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new().route("/hook", post(receive)).with_state(HookState {
            status,
            received: received.clone(),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/hook"), received)
    }

    #[test]
    fn test_payload_colour_and_fields() {
        let payload = alert_payload(&event(Severity::Critical));
        let attachment = &payload["attachments"][0];

        assert_eq!(attachment["color"], "#FF0000");
        assert_eq!(
            attachment["blocks"][0]["text"]["text"],
            "🚨 CRITICAL Alert: aave-v3"
        );
        assert_eq!(
            attachment["blocks"][1]["fields"][3]["text"],
            "*Time:*\n2024-05-02 12:00:00 UTC"
        );
        assert_eq!(
            attachment["blocks"][2]["text"]["text"],
            "*Details:*\nTVL dropped 30.00% in 24h"
        );

        let payload = alert_payload(&event(Severity::Warning));
        assert_eq!(payload["attachments"][0]["color"], "#FFA500");
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        assert!(LogNotifier.notify(&event(Severity::Warning)).await.is_ok());
        assert!(LogNotifier.send_test().await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_success() {
        let (url, received) = webhook_server(StatusCode::OK).await;
        let notifier = WebhookNotifier::new(url, Duration::from_secs(5)).unwrap();
        assert_eq!(notifier.notify(&event(Severity::Critical)).await, Ok(()));

        let received = received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["attachments"][0]["color"], "#FF0000");
    }

    #[tokio::test]
    async fn test_webhook_send_test() {
        let (url, received) = webhook_server(StatusCode::OK).await;
        let notifier = WebhookNotifier::new(url, Duration::from_secs(5)).unwrap();
        assert_eq!(notifier.send_test().await, Ok(()));
        assert!(received.lock()[0]["text"].as_str().unwrap().contains("protomon"));
    }

    #[tokio::test]
    async fn test_webhook_non_success_status() {
        let (url, _received) = webhook_server(StatusCode::INTERNAL_SERVER_ERROR).await;
        let notifier = WebhookNotifier::new(url, Duration::from_secs(5)).unwrap();
        assert_eq!(
            notifier.notify(&event(Severity::Critical)).await,
            Err(NotificationError::Status(500))
        );
    }

    #[tokio::test]
    async fn test_webhook_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let notifier = WebhookNotifier::new(format!("http://{addr}/hook"), Duration::from_secs(2)).unwrap();
        assert!(matches!(
            notifier.send_test().await,
            Err(NotificationError::Http(_))
        ));
    }
}
