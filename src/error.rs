//! Error types for the Turnstile gateway.

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors; fatal at construction, never raised
    /// mid-request
    #[error("Configuration error: {0}")]
    Config(String),

    /// The caller's identity could not be determined
    #[error("Caller key error: {0}")]
    Key(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
