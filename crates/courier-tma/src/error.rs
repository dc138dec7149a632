//! Error types for launch token handling.

use thiserror::Error;

/// Errors from validating, parsing or generating a launch token.
#[derive(Debug, Error)]
pub enum TmaError {
    /// The token carries no `hash` field.
    #[error("token signature is missing")]
    SignMissing,

    /// The recomputed signature does not match `hash`.
    #[error("token signature is invalid")]
    SignInvalid,

    /// The token carries no `auth_date` field.
    #[error("auth_date is missing")]
    AuthDateMissing,

    /// `auth_date` is not a Unix timestamp.
    #[error("auth_date '{0}' is not a valid timestamp")]
    AuthDateInvalid(String),

    /// The token is older than the allowed maximum age.
    #[error("token expired")]
    Expired,

    /// A numeric field does not hold an integer.
    #[error("field '{field}' is not an integer: '{value}'")]
    InvalidNumber { field: String, value: String },

    /// A structured field does not hold the expected JSON.
    #[error("field '{field}' is not valid JSON: {source}")]
    InvalidJson {
        field: String,
        #[source]
        source: serde_json::Error,
    },

    /// The signing key could not be derived.
    #[error("invalid signing key")]
    InvalidKey,
}

/// Result type for launch token operations.
pub type TmaResult<T> = Result<T, TmaError>;
