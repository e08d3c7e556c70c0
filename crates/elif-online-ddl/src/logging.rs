//! Logging setup
//!
//! Every job status transition is reported through `tracing`. Applications
//! that don't install a subscriber of their own can call [`init_logging`].

use serde::{Deserialize, Serialize};
use std::env;
use tracing_subscriber::EnvFilter;

use crate::error::{ConfigError, OnlineDdlError, OnlineDdlResult};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::InvalidValue {
                field: "log_format".to_string(),
                value: s.to_string(),
                expected: "pretty, compact, or json".to_string(),
            }),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `elif_online_ddl=debug`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    /// Load from `LOG_LEVEL` and `LOG_FORMAT`
    pub fn from_env() -> Result<Self, ConfigError> {
        let level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let format = match env::var("LOG_FORMAT") {
            Ok(format) => format.parse()?,
            Err(_) => LogFormat::default(),
        };

        Ok(Self { level, format })
    }

    fn filter(&self) -> OnlineDdlResult<EnvFilter> {
        EnvFilter::try_new(&self.level).map_err(|e| {
            OnlineDdlError::Configuration(ConfigError::InvalidValue {
                field: "log_level".to_string(),
                value: self.level.clone(),
                expected: format!("a tracing filter directive ({})", e),
            })
        })
    }
}

/// Install a global `tracing` subscriber
///
/// Fails instead of panicking when a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> OnlineDdlResult<()> {
    let filter = config.filter()?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|e| OnlineDdlError::Logging(e.to_string()))
}
