//! Error types for SQLsaber.
//!
//! Defines the main error enum used throughout the library.

use thiserror::Error;

/// Main error type for SQLsaber operations.
#[derive(Error, Debug)]
pub enum SaberError {
    /// Configuration errors (missing API key, unknown model, invalid override pair, etc.)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Database connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution errors (syntax errors, missing relations, etc.)
    #[error("Query error: {0}")]
    Query(String),

    /// LLM API and streaming errors (rate limits, auth, malformed SSE, etc.)
    #[error("LLM error: {0}")]
    Llm(String),

    /// Validation errors (invalid tool input, spec schema mismatch, etc.)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Persistence errors from the knowledge and memory stores.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl SaberError {
    /// Creates a configuration error with the given message.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates an LLM error with the given message.
    pub fn llm(msg: impl Into<String>) -> Self {
        Self::Llm(msg.into())
    }

    /// Creates a validation error with the given message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates a storage error with the given message.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "Configuration Error",
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Llm(_) => "LLM Error",
            Self::Validation(_) => "Validation Error",
            Self::Storage(_) => "Storage Error",
        }
    }
}

/// Result type alias using SaberError.
pub type Result<T> = std::result::Result<T, SaberError>;
