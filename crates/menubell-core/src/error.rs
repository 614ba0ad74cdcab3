//! Error taxonomy shared across the workspace.

use thiserror::Error;

/// Convenience alias used throughout Menubell.
pub type Result<T> = std::result::Result<T, MenubellError>;

#[derive(Debug, Error)]
pub enum MenubellError {
    /// Configuration missing or invalid (no channel credentials, bad TOML).
    /// Aborts a run — nothing is partially written.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider/channel failure (network, non-2xx from the Graph API).
    /// Recorded per recipient; never aborts a run.
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Database error: {0}")]
    Database(String),

    /// Inbound payload could not be interpreted.
    #[error("Payload error: {0}")]
    Payload(String),

    /// Referenced row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Audience/strategy resolution failed — run-fatal.
    #[error("Strategy error: {0}")]
    Strategy(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MenubellError {
    /// Wrap a database-layer error. rusqlite lives in menubell-store; the
    /// store maps driver errors through here so core stays driver-free.
    pub fn db(e: impl std::fmt::Display) -> Self {
        Self::Database(e.to_string())
    }
}
