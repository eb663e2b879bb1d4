use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use sitewatch_core::{Transport, TransportError};
use tracing::info;
use url::Url;

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    to: &'a str,
    text: &'a str,
}

/// Delivers each message as a JSON `POST` to a chat bridge.
pub struct WebhookTransport {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl WebhookTransport {
    pub fn new(client: Client, endpoint: Url, timeout: Duration) -> Self {
        Self {
            client,
            endpoint,
            timeout,
        }
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), TransportError> {
        let failed = |reason: String| TransportError {
            recipient: recipient.to_string(),
            reason,
        };
        self.client
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .json(&WebhookMessage {
                to: recipient,
                text,
            })
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?
            .error_for_status()
            .map_err(|e| failed(e.to_string()))?;
        Ok(())
    }
}

/// Writes messages to the log instead of sending them.
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), TransportError> {
        info!(recipient, text, "notification (no webhook configured)");
        Ok(())
    }
}
