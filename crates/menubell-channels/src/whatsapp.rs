//! WhatsApp Business Cloud API channel.
//!
//! Uses the official WhatsApp Business Platform (Cloud API) for messaging.
//! Requires: Access Token + Phone Number ID from Meta Business Suite.

use async_trait::async_trait;
use menubell_core::config::WhatsAppConfig;
use menubell_core::{MenubellError, MessageSender, OutboundPayload, Result, SendOutcome};

/// WhatsApp Business channel implementation.
pub struct WhatsAppClient {
    config: WhatsAppConfig,
    client: reqwest::Client,
}

const SEND_TIMEOUT_SECS: u64 = 30;

impl WhatsAppClient {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Credentials must be present before any send — a missing token is a
    /// run-fatal configuration error, not a per-recipient failure.
    pub fn ensure_configured(&self) -> Result<()> {
        if self.config.access_token.is_empty() {
            return Err(MenubellError::Config(
                "WhatsApp access_token not configured".into(),
            ));
        }
        if self.config.phone_number_id.is_empty() {
            return Err(MenubellError::Config(
                "WhatsApp phone_number_id not configured".into(),
            ));
        }
        Ok(())
    }

    fn messages_url(&self) -> String {
        format!(
            "https://graph.facebook.com/{}/{}/messages",
            self.config.api_version, self.config.phone_number_id
        )
    }

    fn build_body(&self, to: &str, payload: &OutboundPayload) -> serde_json::Value {
        match payload {
            OutboundPayload::Text { body } => serde_json::json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": to,
                "type": "text",
                "text": {
                    "preview_url": false,
                    "body": body
                }
            }),
            OutboundPayload::Template {
                name,
                language,
                components,
            } => serde_json::json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": to,
                "type": "template",
                "template": {
                    "name": name,
                    "language": { "code": language },
                    "components": components
                }
            }),
        }
    }

    /// Mark an inbound message as read.
    pub async fn mark_as_read(&self, message_id: &str) -> Result<()> {
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": message_id
        });

        self.client
            .post(self.messages_url())
            .header("Authorization", format!("Bearer {}", self.config.access_token))
            .json(&body)
            .timeout(std::time::Duration::from_secs(SEND_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| MenubellError::Channel(format!("WhatsApp mark-read failed: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl MessageSender for WhatsAppClient {
    async fn send(&self, phone_number: &str, payload: OutboundPayload) -> Result<SendOutcome> {
        self.ensure_configured()?;

        let body = self.build_body(phone_number, &payload);

        let response = self
            .client
            .post(self.messages_url())
            .header("Authorization", format!("Bearer {}", self.config.access_token))
            .header("Content-Type", "application/json")
            .json(&body)
            .timeout(std::time::Duration::from_secs(SEND_TIMEOUT_SECS))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("WhatsApp API request failed for {}: {e}", phone_number);
                return Ok(SendOutcome {
                    success: false,
                    provider_status: 0,
                    external_id: None,
                    request_payload: body,
                    response_payload: serde_json::json!({ "error": e.to_string() }),
                });
            }
        };

        let status = response.status().as_u16();
        let response_json: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => serde_json::json!({ "error": format!("Invalid WhatsApp response: {e}") }),
        };

        let success = (200..300).contains(&status);
        let external_id = response_json["messages"][0]["id"]
            .as_str()
            .map(|s| s.to_string());

        if success {
            tracing::debug!(
                "WhatsApp message sent: {} → {}",
                external_id.as_deref().unwrap_or("unknown"),
                phone_number
            );
        } else {
            tracing::warn!("WhatsApp API error {} for {}", status, phone_number);
        }

        Ok(SendOutcome {
            success,
            provider_status: status,
            external_id,
            request_payload: body,
            response_payload: response_json,
        })
    }
}
