//! Messenger automation host — the seam to the supplied WhatsApp client.
//!
//! The host runs the actual browser-automation/wire protocol. Wasend only
//! tells it to start or stop a tenant's session and hands it outbound
//! messages; auth progress comes back as webhook events
//! ([`HostEvent`], ingested by the gateway).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use wasend_core::config::HostConfig;
use wasend_core::{ClientId, OutboundMessage, Result, WasendError};

/// Lifecycle event reported by the automation host for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HostEvent {
    /// A fresh pairing QR code is available for scanning.
    QrGenerated { qr: String },
    /// The QR was scanned and credentials were accepted.
    Authenticated,
    /// The session is fully synced and can send.
    Ready,
    /// The session ended — logout on the phone, credential revocation, or
    /// death of the automation process.
    Closed {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Operations Wasend invokes on the automation host.
#[async_trait]
pub trait MessengerHost: Send + Sync {
    /// Allocate and boot the underlying client for `client_id`. Auth
    /// progress arrives asynchronously as [`HostEvent`]s.
    async fn start(&self, client_id: &ClientId) -> Result<()>;

    /// Deliver one message through the tenant's live session. Returns the
    /// provider message id.
    async fn send(&self, client_id: &ClientId, message: &OutboundMessage) -> Result<String>;

    /// Tear down the tenant's client and release its resources.
    async fn stop(&self, client_id: &ClientId) -> Result<()>;
}

/// HTTP adapter for an automation host exposing a small REST API.
pub struct HttpMessengerHost {
    config: HostConfig,
    client: reqwest::Client,
}

impl HttpMessengerHost {
    pub fn new(config: HostConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    fn url(&self, client_id: &ClientId, suffix: &str) -> String {
        format!(
            "{}/api/sessions/{}{}",
            self.config.base_url.trim_end_matches('/'),
            client_id,
            suffix
        )
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.api_key.is_empty() {
            req
        } else {
            req.header("Authorization", format!("Bearer {}", self.config.api_key))
        }
    }
}

#[async_trait]
impl MessengerHost for HttpMessengerHost {
    async fn start(&self, client_id: &ClientId) -> Result<()> {
        let response = self
            .authorize(self.client.post(self.url(client_id, "/start")))
            .send()
            .await
            .map_err(|e| WasendError::host(format!("start request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!("🔌 Host started session for {client_id}");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.as_u16() == 503 {
            return Err(WasendError::ResourceExhausted(format!(
                "host refused new session: {status}"
            )));
        }
        Err(WasendError::host(format!("start rejected ({status}): {body}")))
    }

    async fn send(&self, client_id: &ClientId, message: &OutboundMessage) -> Result<String> {
        let response = self
            .authorize(self.client.post(self.url(client_id, "/messages")))
            .json(message)
            .send()
            .await
            .map_err(|e| WasendError::send_transient(format!("send request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| WasendError::send_transient(format!("invalid host response: {e}")))?;
            let message_id = body["message_id"].as_str().unwrap_or("unknown").to_string();
            tracing::debug!("📨 Host accepted message {} → {}", message_id, message.to);
            return Ok(message_id);
        }

        let body = response.text().await.unwrap_or_default();
        match status.as_u16() {
            404 | 410 => Err(WasendError::SessionLost(format!(
                "host has no session for {client_id}"
            ))),
            408 | 429 | 500..=599 => {
                Err(WasendError::send_transient(format!("host busy ({status}): {body}")))
            }
            _ => Err(WasendError::send_permanent(format!(
                "host rejected message ({status}): {body}"
            ))),
        }
    }

    async fn stop(&self, client_id: &ClientId) -> Result<()> {
        let response = self
            .authorize(self.client.delete(self.url(client_id, "")))
            .send()
            .await
            .map_err(|e| WasendError::host(format!("stop request failed: {e}")))?;

        // 404 means already gone — stop is idempotent.
        if response.status().is_success() || response.status().as_u16() == 404 {
            return Ok(());
        }
        Err(WasendError::host(format!("stop rejected: {}", response.status())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_event_wire_format() {
        let event: HostEvent =
            serde_json::from_str(r#"{"event":"qr-generated","qr":"2@abc"}"#).unwrap();
        assert!(matches!(event, HostEvent::QrGenerated { ref qr } if qr == "2@abc"));

        let event: HostEvent = serde_json::from_str(r#"{"event":"closed"}"#).unwrap();
        assert!(matches!(event, HostEvent::Closed { reason: None }));

        let event: HostEvent =
            serde_json::from_str(r#"{"event":"closed","reason":"PHONE_LOGOUT"}"#).unwrap();
        assert!(matches!(event, HostEvent::Closed { reason: Some(ref r) } if r == "PHONE_LOGOUT"));
    }

    #[test]
    fn url_shape() {
        let host = HttpMessengerHost::new(HostConfig {
            base_url: "http://127.0.0.1:4730/".into(),
            api_key: String::new(),
            timeout_secs: 5,
        });
        assert_eq!(
            host.url(&ClientId::from("t1"), "/start"),
            "http://127.0.0.1:4730/api/sessions/t1/start"
        );
    }
}
