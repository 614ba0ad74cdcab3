//! # Menubell Channels
//! The WhatsApp Business Cloud API integration: outbound sends and
//! inbound webhook payload parsing.

pub mod payload;
pub mod whatsapp;

pub use payload::parse_webhook_payload;
pub use whatsapp::WhatsAppClient;
