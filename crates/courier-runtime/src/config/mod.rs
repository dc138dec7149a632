//! Configuration for a Courier application.
//!
//! TOML files, `COURIER_*` environment variables and programmatic overrides
//! are layered with figment into a validated [`CourierConfig`].

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    BotConfig, BroadcastConfig, CourierConfig, LogFormat, LogLevel, LogOutput, LoggingConfig,
    MentionConfig, PipelineConfig, SpanEventConfig, TmaConfig,
};
pub use validation::validate_config;
