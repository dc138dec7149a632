//! Courier Runtime - the application shell around the update pipeline.
//!
//! This crate provides:
//! - Configuration loading and validation ([`config`])
//! - Logging setup ([`logging`])
//! - [`App`], which assembles the built-in pipeline stages from configuration,
//!   binds routes, consumes an update stream and paces broadcasts
//!
//! Receiving updates is left to the caller: anything that yields a
//! `Stream<Item = Update>` (long polling, a webhook receiver, a test vector)
//! can drive [`App::run`].

pub mod app;
pub mod config;
pub mod error;
pub mod logging;

pub use app::{App, AppBuilder, wait_for_shutdown};
pub use config::{ConfigError, ConfigLoader, ConfigResult, CourierConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;
