//! WhatsApp channel — POSTs to a relay webhook with a JSON body.

use std::time::Duration;

use async_trait::async_trait;

use blx_core::config::WhatsAppConfig;
use blx_core::error::{BlxError, Result};
use blx_core::traits::MessageSender;

pub struct WhatsAppSender {
    config: WhatsAppConfig,
    client: reqwest::Client,
}

impl WhatsAppSender {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self { config, client: reqwest::Client::new() }
    }
}

#[async_trait]
impl MessageSender for WhatsAppSender {
    async fn send(&self, phone: &str, text: &str) -> Result<()> {
        if !self.config.enabled {
            return Err(BlxError::Channel("whatsapp channel disabled".into()));
        }
        if self.config.webhook_url.is_empty() {
            return Err(BlxError::Channel("whatsapp webhook url not configured".into()));
        }

        let resp = self
            .client
            .post(&self.config.webhook_url)
            .json(&serde_json::json!({
                "phone": phone,
                "message": text,
            }))
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await
            .map_err(|e| BlxError::Channel(format!("whatsapp send failed: {e}")))?;

        if resp.status().is_success() {
            tracing::info!("whatsapp message sent to {phone}");
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(BlxError::Channel(format!("whatsapp relay error {status}: {body}")))
        }
    }
}
