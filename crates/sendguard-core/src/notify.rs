//! Webhook notifications
//!
//! After a batch run, the statistics and the addresses needing attention
//! are posted to a configured webhook. Formatting for chat systems and
//! retry policy live on the receiving side; this end only delivers the
//! payload, signed so receivers can authenticate it.

use hmac::{Hmac, Mac};
use reqwest::Client;
use sendguard_common::config::NotifyConfig;
use sendguard_common::{Error, FailedAddress, Result, ValidationStats};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "X-Sendguard-Signature";

/// Payload delivered to the webhook
#[derive(Debug, Clone, Serialize)]
pub struct Notification<'a> {
    pub statistics: &'a ValidationStats,
    pub failed_addresses: &'a [FailedAddress],
}

/// Webhook notifier
pub struct Notifier {
    client: Client,
    config: NotifyConfig,
}

impl Notifier {
    pub fn new(config: NotifyConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Notify(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Deliver a batch summary. A disabled or unconfigured notifier is a
    /// quiet no-op.
    pub async fn send(
        &self,
        statistics: &ValidationStats,
        failed_addresses: &[FailedAddress],
    ) -> Result<()> {
        if !self.config.enabled {
            debug!("Notifications disabled, skipping delivery");
            return Ok(());
        }

        let Some(url) = self.config.webhook_url.as_deref() else {
            debug!("No webhook URL configured, skipping delivery");
            return Ok(());
        };

        let payload = Notification {
            statistics,
            failed_addresses,
        };
        let body = serde_json::to_vec(&payload)
            .map_err(|e| Error::Notify(format!("Could not serialize payload: {}", e)))?;

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body.clone());

        if let Some(secret) = self.config.secret.as_deref() {
            request = request.header(SIGNATURE_HEADER, sign(secret, &body));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Notify(format!("Webhook delivery failed: {}", e)))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Webhook endpoint returned an error");
            return Err(Error::Notify(format!(
                "Webhook endpoint returned {}",
                response.status()
            )));
        }

        info!(
            failed = failed_addresses.len(),
            "Notification delivered"
        );
        Ok(())
    }
}

/// HMAC-SHA256 signature over the raw body
fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
