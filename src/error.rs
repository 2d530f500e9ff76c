//! Error types for the marketplace sync engine

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Engine error types
///
/// Payloads are plain strings so a single failure can be handed to every
/// caller waiting on a coalesced request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Transport failure talking to the backend
    #[error("Network error: {0}")]
    Network(String),

    /// Backend answered with an error status
    #[error("Backend error {status}: {message}")]
    Backend { status: u16, message: String },

    /// Entity not found (locally or remotely)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote write rejected as invalid
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Remote write rejected because the entity moved on
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Viewer is not allowed to perform the operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Push payload or fetch result missing fields that cannot be defaulted
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Negotiation or lifecycle rule refused the action locally
    #[error("Illegal action: {0}")]
    IllegalAction(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse error classes surfaced to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Feed or detail fetch failed; last-known-good cache is retained
    Fetch,
    /// Remote write rejected; optimistic effect was rolled back
    Mutation,
    /// Inbound data could not be used
    Malformed,
    /// Local setup problem
    Config,
}

impl SyncError {
    /// Map onto the fetch / mutation / malformed taxonomy
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::Network(_) | SyncError::NotFound(_) => ErrorCategory::Fetch,
            SyncError::Backend { .. }
            | SyncError::Validation(_)
            | SyncError::Conflict(_)
            | SyncError::Unauthorized(_)
            | SyncError::IllegalAction(_) => ErrorCategory::Mutation,
            SyncError::MalformedPayload(_) | SyncError::Serialization(_) => {
                ErrorCategory::Malformed
            }
            SyncError::Config(_) => ErrorCategory::Config,
        }
    }

    /// Map an HTTP status and body onto an error variant
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 | 422 => SyncError::Validation(message),
            401 | 403 => SyncError::Unauthorized(message),
            404 => SyncError::NotFound(message),
            409 => SyncError::Conflict(message),
            _ => SyncError::Backend { status, message },
        }
    }
}

#[cfg(feature = "client")]
impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}
