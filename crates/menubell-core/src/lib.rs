//! # Menubell Core
//! Shared types, configuration, and error taxonomy.

pub mod config;
pub mod error;
pub mod sender;
pub mod types;

pub use error::{MenubellError, Result};
pub use sender::{MessageSender, OutboundPayload, SendOutcome};
