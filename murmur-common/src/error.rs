//! Error types for the Murmur services.

use thiserror::Error;

/// Result type alias using the Murmur error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for Murmur services.
///
/// Every variant maps to an HTTP status so the request boundary can turn
/// any failure into a structured error response instead of crashing the
/// serving process.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or invalid input fields
    #[error("Invalid input: {0}")]
    Validation(String),

    /// External completion/embedding/retrieval failure
    #[error("Provider error: {0}")]
    Provider(String),

    /// Operation referenced a session or resource that does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO error (prompt files, uploaded documents)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error (prompt templates)
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a provider error.
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Check if this is a provider error.
    pub const fn is_provider(&self) -> bool {
        matches!(self, Self::Provider(_))
    }

    /// Get HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Provider(_) => 502,
            _ => 500,
        }
    }
}
