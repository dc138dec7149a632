//! Error types shared across the Courier crates.
//!
//! Framework-level errors (routing, broadcast) live in `courier-framework`.

use std::time::Duration;

use thiserror::Error;

// =============================================================================
// API Errors
// =============================================================================

/// Errors reported by a [`PlatformClient`](crate::PlatformClient) call.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The platform asked us to slow down and retry after the given delay.
    #[error("too many requests, retry after {retry_after:?}")]
    RateLimited {
        /// Server-specified wait before the next attempt.
        retry_after: Duration,
    },

    /// The retry budget ran out while the platform kept throttling.
    #[error("max retries exceeded")]
    RetriesExceeded,

    /// The platform rejected the call.
    #[error("API error ({code}): {description}")]
    Platform { code: i64, description: String },

    /// Failed to serialize or deserialize a payload.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl ApiError {
    /// Returns the server-specified wait if this is a rate-limit signal.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Callback Data Errors
// =============================================================================

/// Errors from encoding or decoding `route:payload` callback data.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The data has no `route:` prefix.
    #[error("invalid callback data format")]
    InvalidFormat,

    /// Route identifiers must not contain the `:` separator.
    #[error("route '{0}' must not contain ':'")]
    InvalidRoute(String),

    /// The payload could not be (de)serialized.
    #[error("invalid callback payload for route '{route}': {source}")]
    Payload {
        route: String,
        #[source]
        source: serde_json::Error,
    },
}

// =============================================================================
// Context Errors
// =============================================================================

/// Why an execution [`Context`](crate::Context) stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The cancellation token fired.
    #[error("context cancelled")]
    Cancelled,
    /// The deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type for callback data encoding.
pub type CodecResult<T> = Result<T, CodecError>;
