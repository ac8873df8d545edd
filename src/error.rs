//! Error types for the edge collector
//!
//! All fallible operations in the crate return [`Result`]. Transport-level
//! failures and single-register read failures are separate variants so the
//! session can apply the right recovery policy to each; backend HTTP failures
//! pass through from `reqwest`.

use thiserror::Error;

/// Result type alias for edge collector operations
pub type Result<T> = std::result::Result<T, EdgeError>;

/// Error types for edge collector operations
#[derive(Error, Debug)]
pub enum EdgeError {
    /// Transport-level connection errors (refused, reset, unreachable)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Single-register read errors (protocol exception or timeout)
    #[error("Register read failed: {0}")]
    Read(String),

    /// Operation exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Service configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl EdgeError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a register read error
    pub fn read(msg: impl Into<String>) -> Self {
        Self::Read(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a service configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if this error should route through the session's
    /// disconnection handler (terminal for the current socket)
    pub fn is_connection_error(&self) -> bool {
        matches!(self, EdgeError::Connection(_) | EdgeError::Timeout(_))
    }
}
