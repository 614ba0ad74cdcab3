//! Inbound webhook payload parsing.
//!
//! The Graph API wraps messages several levels deep:
//! `entry[].changes[].value.{contacts[], messages[]}`. Only changes with
//! `field == "messages"` carry chat traffic. Entries that do not match the
//! expected shape are skipped — a malformed batch member is never fatal.

use menubell_core::types::{InboundMessage, MessageType};

/// Parse a raw webhook payload into normalized inbound messages.
pub fn parse_webhook_payload(payload: &serde_json::Value) -> Vec<InboundMessage> {
    let mut parsed = Vec::new();

    let entries = payload["entry"].as_array().cloned().unwrap_or_default();
    for entry in &entries {
        let changes = entry["changes"].as_array().cloned().unwrap_or_default();
        for change in &changes {
            if change["field"].as_str() != Some("messages") {
                continue;
            }
            let value = &change["value"];

            // contact names keyed by wa_id
            let mut names = std::collections::HashMap::new();
            for contact in value["contacts"].as_array().unwrap_or(&Vec::new()) {
                if let Some(wa_id) = contact["wa_id"].as_str() {
                    if let Some(name) = contact["profile"]["name"].as_str() {
                        names.insert(wa_id.to_string(), name.to_string());
                    }
                }
            }

            for message in value["messages"].as_array().unwrap_or(&Vec::new()) {
                let Some(from) = message["from"].as_str() else {
                    tracing::debug!("Skipping webhook message without 'from'");
                    continue;
                };

                let type_str = message["type"].as_str().unwrap_or("text");
                let message_type = MessageType::parse(type_str);

                parsed.push(InboundMessage {
                    from: from.to_string(),
                    contact_name: names.get(from).cloned(),
                    external_id: message["id"].as_str().map(|s| s.to_string()),
                    message_type,
                    body: extract_body(message, message_type),
                });
            }
        }
    }

    parsed
}

/// Pull the human-readable body out of a type-specific field. Unknown types
/// yield None and are still recorded as received.
fn extract_body(message: &serde_json::Value, message_type: MessageType) -> Option<String> {
    let field = match message_type {
        MessageType::Text => &message["text"]["body"],
        MessageType::Image => &message["image"]["caption"],
        MessageType::Video => &message["video"]["caption"],
        MessageType::Document => &message["document"]["caption"],
        _ => return None,
    };
    field.as_str().map(|s| s.to_string())
}
