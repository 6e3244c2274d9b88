//! Error types for Noesis.
//!
//! This module provides the application-level error hierarchy. Lower layers
//! (transport, registry, reasoning backends) keep their own error types and
//! convert into this one at the crate boundary.

use thiserror::Error;

/// Result type alias using the Noesis error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Noesis.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// MCP error
    #[error("MCP error: {0}")]
    Mcp(String),

    /// No MCP server is connected that could serve the request
    #[error("No MCP server available")]
    NoServerAvailable,

    /// Reasoning backend error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Vault access error
    #[error("Vault error: {0}")]
    Vault(String),

    /// Host editor error
    #[error("Host error: {0}")]
    Host(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => Some("Check your config file at ~/.config/noesis/config.toml"),
            Error::Mcp(_) => Some("Run 'noesis mcp list' to check server status"),
            Error::NoServerAvailable => {
                Some("Enable at least one server under [servers] in your config")
            }
            Error::Provider(_) => Some("Check the [llm] section or switch router.mode to heuristic"),
            Error::Vault(_) => Some("Check that general.vault_path points to a readable directory"),
            Error::NotFound(_) => Some("Check the path or identifier and try again"),
            _ => None,
        }
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}
