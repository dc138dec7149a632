//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{BroadcastConfig, CourierConfig, LogOutput, LoggingConfig, MentionConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &CourierConfig) -> ConfigResult<()> {
    validate_mention_config(&config.pipeline.mention)?;
    validate_broadcast_config(&config.broadcast)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_mention_config(mention: &MentionConfig) -> ConfigResult<()> {
    if mention.enabled && mention.info_expire_secs == 0 {
        return Err(ConfigError::validation(
            "pipeline.mention.info_expire_secs must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_broadcast_config(broadcast: &BroadcastConfig) -> ConfigResult<()> {
    // zero disables limiting; anything else must be a usable rate
    if !broadcast.rate_per_sec.is_finite() || broadcast.rate_per_sec < 0.0 {
        return Err(ConfigError::validation(format!(
            "broadcast.rate_per_sec must be a non-negative number, got {}",
            broadcast.rate_per_sec
        )));
    }

    if broadcast.burst == 0 {
        return Err(ConfigError::validation(
            "broadcast.burst must be greater than 0",
        ));
    }

    if broadcast.max_retries < 0 {
        return Err(ConfigError::validation(
            "broadcast.max_retries cannot be negative",
        ));
    }

    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&CourierConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_broadcast() {
        let mut config = CourierConfig::default();
        config.broadcast.rate_per_sec = 0.0;
        assert!(validate_config(&config).is_ok());

        config.broadcast.rate_per_sec = f64::NAN;
        assert!(validate_config(&config).is_err());

        config.broadcast.rate_per_sec = 30.0;
        config.broadcast.max_retries = -1;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_mention_expiry() {
        let mut config = CourierConfig::default();
        config.pipeline.mention.info_expire_secs = 0;
        assert!(validate_config(&config).is_ok());

        config.pipeline.mention.enabled = true;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_validate_file_output_needs_path() {
        let mut config = CourierConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }
}
