//! Error types for the Turnstile admission controller.

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Refill rate that is zero, negative or not finite
    #[error("Configuration error: rate must be a finite number greater than zero, got {0}")]
    InvalidRate(f64),

    /// Burst capacity of zero
    #[error("Configuration error: burst must be at least 1, got {0}")]
    InvalidBurst(u32),

    /// The identifier could not be extracted from a request
    #[error("Identifier extraction failed: {0}")]
    Extraction(String),

    /// Layered configuration loading errors
    #[error("Configuration source error: {0}")]
    Source(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TurnstileError {
    /// Whether this error was raised while validating or loading configuration.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            TurnstileError::Config(_)
                | TurnstileError::InvalidRate(_)
                | TurnstileError::InvalidBurst(_)
                | TurnstileError::Source(_)
        )
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
