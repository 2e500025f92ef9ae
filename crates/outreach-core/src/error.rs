//! Error types for Outreach.

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, OutreachError>;

#[derive(Debug, Error)]
pub enum OutreachError {
    /// The persistent store failed (unreachable, locked, constraint error).
    #[error("Store error: {0}")]
    Store(String),

    /// A store round trip exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A status change was requested from a state that does not allow it.
    #[error("Invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl OutreachError {
    /// Whether the caller should retry the whole request later.
    ///
    /// Only persistence and deadline failures qualify; everything else is a
    /// caller mistake or a permanent condition.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Timeout(_) | Self::Io(_))
    }
}
