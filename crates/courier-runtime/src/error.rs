//! Runtime error types.

use thiserror::Error;

use courier_framework::RouteError;

use crate::config::ConfigError;

/// Errors that can occur while assembling an application.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A route could not be bound.
    #[error(transparent)]
    Route(#[from] RouteError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
