//! Error types for the ragline domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Outbound collaborators (providers, stores) each get their own enum;
//! [`Error`] is what the pipeline surfaces to its caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all pipeline operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad caller input. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The user does not own the chat (or the chat does not exist).
    #[error("User {user_id} is not authorized for chat {chat_id}")]
    Unauthorized { user_id: String, chat_id: String },

    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        #[source]
        last: ProviderError,
    },

    // --- Persistence errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Operation cancelled")]
    Cancelled,

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The caller's answer sink refused a delta.
    #[error("Answer delivery failed: {0}")]
    Delivery(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Classify this error for the caller-facing event stream.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Unauthorized { .. } => ErrorKind::Unauthorized,
            Error::Provider(_) | Error::RetryExhausted { .. } => ErrorKind::ProviderUnavailable,
            Error::Store(_) => ErrorKind::Persistence,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Config { .. } => ErrorKind::Configuration,
            Error::Delivery(_) => ErrorKind::Delivery,
        }
    }
}

/// Caller-facing error classification.
///
/// Carries no provider detail; the full [`Error`] is only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    ProviderUnavailable,
    Persistence,
    Cancelled,
    Configuration,
    Delivery,
}

impl ErrorKind {
    /// A message that is safe to show to an end user.
    pub fn public_message(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "The request was invalid.",
            ErrorKind::Unauthorized => "You do not have access to this conversation.",
            ErrorKind::ProviderUnavailable => {
                "The answering service is temporarily unavailable. Please try again."
            }
            ErrorKind::Persistence => "Your message could not be saved.",
            ErrorKind::Cancelled => "The request was cancelled.",
            ErrorKind::Configuration => "The service is not configured correctly.",
            ErrorKind::Delivery => "The answer could not be delivered.",
        }
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// The vector collection or index does not exist.
    #[error("Vector index not found: {0}")]
    IndexNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Empty response from {operation}")]
    EmptyResponse { operation: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl ProviderError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network(_)
            | ProviderError::Timeout(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::EmptyResponse { .. } => true,
            ProviderError::ApiError { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Persistence queue is full")]
    QueueFull,

    #[error("Persistence queue is closed")]
    QueueClosed,
}
