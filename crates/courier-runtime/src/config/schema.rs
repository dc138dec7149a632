//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourierConfig {
    /// Platform credentials.
    #[serde(default)]
    pub bot: BotConfig,

    /// Built-in update pipeline stages.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Outbound broadcast pacing.
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Mini-app launch tokens.
    #[serde(default)]
    pub tma: TmaConfig,

    /// Logging output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// =============================================================================
// Bot
// =============================================================================

/// Bot credentials.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    /// Bot API token. Also the signing secret for launch tokens.
    #[serde(default)]
    pub token: String,
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = if self.token.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("BotConfig").field("token", &token).finish()
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Which built-in stages run ahead of user middlewares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Turn handler panics into logged errors.
    #[serde(default = "default_true")]
    pub recovery: bool,

    /// Collapse concurrent callback queries on the same message.
    #[serde(default = "default_true")]
    pub dedup: bool,

    /// Inject the sender's claims into the context.
    #[serde(default = "default_true")]
    pub auth: bool,

    /// Group mention filtering.
    #[serde(default)]
    pub mention: MentionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recovery: true,
            dedup: true,
            auth: true,
            mention: MentionConfig::default(),
        }
    }
}

/// Group mention filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentionConfig {
    /// Drop group messages that do not address the bot.
    #[serde(default)]
    pub enabled: bool,

    /// Remove the mention from the text handlers see.
    #[serde(default)]
    pub trim_mention: bool,

    /// How long the bot's identity is cached, in seconds.
    #[serde(default = "default_info_expire_secs")]
    pub info_expire_secs: u64,
}

impl Default for MentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trim_mention: false,
            info_expire_secs: default_info_expire_secs(),
        }
    }
}

impl MentionConfig {
    pub fn info_expire(&self) -> Duration {
        Duration::from_secs(self.info_expire_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_info_expire_secs() -> u64 {
    3600
}

// =============================================================================
// Broadcast
// =============================================================================

/// Broadcast pacing and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Sends admitted per second; zero disables limiting.
    #[serde(default = "default_rate_per_sec")]
    pub rate_per_sec: f64,

    /// Sends admitted back to back before pacing kicks in.
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Retries per send after the platform throttles it.
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,

    /// Abort on the first failed send instead of counting it.
    #[serde(default)]
    pub stop_on_first_error: bool,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            rate_per_sec: default_rate_per_sec(),
            burst: default_burst(),
            max_retries: default_max_retries(),
            stop_on_first_error: false,
        }
    }
}

fn default_rate_per_sec() -> f64 {
    25.0
}

fn default_burst() -> u32 {
    1
}

fn default_max_retries() -> i32 {
    3
}

// =============================================================================
// TMA
// =============================================================================

/// Launch token settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmaConfig {
    /// Maximum token age in seconds; zero accepts any age.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for TmaConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age_secs(),
        }
    }
}

impl TmaConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

fn default_max_age_secs() -> u64 {
    86_400
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to compact otherwise.
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include file and line of the call site.
    #[serde(default)]
    pub file_location: bool,

    /// Log file, used when `output` is `file`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Rotated log files kept, daily rotation; zero keeps all.
    #[serde(default = "default_max_files")]
    pub max_files: u32,

    /// Per-module level overrides, e.g. `courier_framework = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            file_path: None,
            max_files: default_max_files(),
            filters: HashMap::new(),
        }
    }
}

fn default_max_files() -> u32 {
    5
}
