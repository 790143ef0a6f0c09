/// HTTP bridge between the broker and subscriber workers
///
/// Delivers leased job payloads to callback URLs and probes worker health
/// endpoints. Only a 200 response counts as success for either call.

use crate::error::{EngineError, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DispatchBridge {
    client: Client,
}

impl DispatchBridge {
    /// Build a bridge whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self { client })
    }

    /// POST a raw JSON job payload to `callback_url`
    pub async fn deliver(&self, callback_url: &str, payload: &[u8]) -> Result<()> {
        tracing::debug!("📤 Delivering {} bytes to {}", payload.len(), callback_url);

        let response = self
            .client
            .post(callback_url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| EngineError::DeliveryFailed {
                url: callback_url.to_string(),
                reason: e.to_string(),
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(EngineError::DeliveryFailed {
                url: callback_url.to_string(),
                reason: format!("unexpected status {}", status),
            }),
        }
    }

    /// GET `url`; healthy only on 200
    pub async fn health_check(&self, url: &str) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::HealthCheckFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(EngineError::HealthCheckFailed {
                url: url.to_string(),
                reason: format!("unexpected status {}", status),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_endpoints_are_reported() {
        let bridge = DispatchBridge::new(Duration::from_millis(500)).unwrap();

        // Port 9 (discard) on localhost is not expected to be listening.
        let err = bridge.health_check("http://127.0.0.1:9/health").await.unwrap_err();
        assert!(matches!(err, EngineError::HealthCheckFailed { .. }));

        let err = bridge
            .deliver("http://127.0.0.1:9/jobs", b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DeliveryFailed { .. }));
    }
}
