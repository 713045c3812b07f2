/*
[INPUT]:  Error sources (transport, handshake, validation, correlation, resilience)
[OUTPUT]: Structured error types with retry hints and monitor categories
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use thiserror::Error;

use crate::resilience::ErrorCategory;

/// Main error type for the Pocket Option adapter
#[derive(Error, Debug)]
pub enum PocketOptionError {
    /// Every candidate endpoint failed, or the socket could not be opened
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// A handshake step did not complete in time
    #[error("Handshake timed out waiting for {step} after {timeout_ms}ms")]
    HandshakeTimeout { step: &'static str, timeout_ms: u64 },

    /// Operation attempted while the session is down
    #[error("Not connected")]
    NotConnected,

    /// Server rejected the session credentials
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Asset, amount or duration outside the configured bounds
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A bounded wait elapsed
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// Order could not be dispatched
    #[error("Order placement failed: {0}")]
    OrderPlacement(String),

    /// Circuit breaker is open and short-circuited the call
    #[error("Circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    /// Balance refresh never landed
    #[error("Balance data not available")]
    BalanceUnavailable,

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Invalid frame or payload from server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PocketOptionError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PocketOptionError::ConnectionFailed { .. }
                | PocketOptionError::HandshakeTimeout { .. }
                | PocketOptionError::Timeout { .. }
                | PocketOptionError::WebSocket(_)
                | PocketOptionError::InvalidResponse(_)
                | PocketOptionError::BalanceUnavailable
        )
    }

    /// Check if error indicates authentication failure
    pub fn is_auth_error(&self) -> bool {
        matches!(self, PocketOptionError::Authentication { .. })
    }

    /// Category used when the error is fed to the error monitor
    pub fn category(&self) -> ErrorCategory {
        match self {
            PocketOptionError::ConnectionFailed { .. }
            | PocketOptionError::HandshakeTimeout { .. }
            | PocketOptionError::NotConnected
            | PocketOptionError::WebSocket(_)
            | PocketOptionError::UrlParse(_) => ErrorCategory::Connection,
            PocketOptionError::Authentication { .. } => ErrorCategory::Authentication,
            PocketOptionError::InvalidParameter(_) | PocketOptionError::OrderPlacement(_) => {
                ErrorCategory::Trading
            }
            PocketOptionError::Timeout { .. }
            | PocketOptionError::BalanceUnavailable
            | PocketOptionError::Serialization(_)
            | PocketOptionError::InvalidResponse(_) => ErrorCategory::Data,
            PocketOptionError::CircuitOpen { .. } | PocketOptionError::Config(_) => {
                ErrorCategory::System
            }
        }
    }

    pub(crate) fn websocket(err: impl std::fmt::Display) -> Self {
        PocketOptionError::WebSocket(err.to_string())
    }
}

/// Result type alias for Pocket Option operations
pub type Result<T> = std::result::Result<T, PocketOptionError>;
