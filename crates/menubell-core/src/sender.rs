//! The `MessageSender` seam — everything the engine knows about the
//! messaging provider. The Graph API implementation lives in
//! menubell-channels; tests script their own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What goes over the wire: free-form text (window open) or a
/// pre-approved template (window closed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundPayload {
    Text {
        body: String,
    },
    Template {
        name: String,
        language: String,
        /// Graph API `components` array, passed through opaquely.
        components: serde_json::Value,
    },
}

/// Result of one provider send, kept whole for the message audit columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOutcome {
    pub success: bool,
    /// HTTP status from the provider, 0 when the request never completed.
    pub provider_status: u16,
    /// Provider message id (`wamid.…`) when the send was accepted.
    pub external_id: Option<String>,
    pub request_payload: serde_json::Value,
    pub response_payload: serde_json::Value,
}

/// Capability consumed by the engine. A failed send is an `Ok(SendOutcome {
/// success: false, .. })` — `Err` is reserved for misconfiguration, which is
/// run-fatal.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, phone_number: &str, payload: OutboundPayload) -> Result<SendOutcome>;
}
