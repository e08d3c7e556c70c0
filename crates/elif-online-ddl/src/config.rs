//! Online DDL configuration types and builders

use serde::{Deserialize, Serialize};
use service_builder::builder;
use std::env;
use std::time::Duration;

use crate::error::ConfigError;
use crate::poller::PollSettings;
use crate::strategy::{DdlStrategy, DEFAULT_DDL_STRATEGY};

/// Configuration for online DDL tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[builder]
pub struct OnlineDdlConfig {
    /// Strategy applied to every migration unit unless the unit overrides it
    #[builder(default = "DEFAULT_DDL_STRATEGY.to_string()", getter)]
    pub default_strategy: String,

    /// How long to wait for the jobs of a unit before giving up
    #[builder(default = "Duration::from_secs(300)", getter)]
    pub wait_timeout: Duration,

    /// First delay between status polls
    #[builder(default = "Duration::from_secs(2)", getter)]
    pub initial_poll_interval: Duration,

    /// Upper bound for the doubling delay between status polls
    #[builder(default = "Duration::from_secs(30)", getter)]
    pub max_poll_interval: Duration,

    /// Substring of `SELECT VERSION()` identifying a Vitess server
    #[builder(default = "\"Vitess\".to_string()", getter)]
    pub capability_marker: String,

    /// Substring of `@@ddl_strategy` identifying a tracked strategy
    #[builder(default = "\"vitess\".to_string()", getter)]
    pub tracked_strategy_marker: String,
}

impl Default for OnlineDdlConfig {
    fn default() -> Self {
        Self {
            default_strategy: DEFAULT_DDL_STRATEGY.to_string(),
            wait_timeout: Duration::from_secs(300), // 5 minutes
            initial_poll_interval: Duration::from_secs(2),
            max_poll_interval: Duration::from_secs(30),
            capability_marker: "Vitess".to_string(),
            tracked_strategy_marker: "vitess".to_string(),
        }
    }
}

impl OnlineDdlConfig {
    /// Load configuration from environment variables, falling back to defaults
    ///
    /// Durations are whole seconds.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            default_strategy: get_env_or_default("ELIF_DDL_STRATEGY", &defaults.default_strategy),
            wait_timeout: get_env_seconds("ELIF_DDL_WAIT_TIMEOUT", defaults.wait_timeout)?,
            initial_poll_interval: get_env_seconds(
                "ELIF_DDL_POLL_INTERVAL",
                defaults.initial_poll_interval,
            )?,
            max_poll_interval: get_env_seconds(
                "ELIF_DDL_MAX_POLL_INTERVAL",
                defaults.max_poll_interval,
            )?,
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_strategy.trim().is_empty() {
            return Err(ConfigError::ValidationFailed {
                field: "default_strategy".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        if self.initial_poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed {
                field: "initial_poll_interval".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.max_poll_interval < self.initial_poll_interval {
            return Err(ConfigError::ValidationFailed {
                field: "max_poll_interval".to_string(),
                reason: format!(
                    "{:?} is shorter than initial_poll_interval {:?}",
                    self.max_poll_interval, self.initial_poll_interval
                ),
            });
        }

        Ok(())
    }

    pub fn strategy(&self) -> DdlStrategy {
        DdlStrategy::new(self.default_strategy.clone())
    }

    /// Poll settings for a wait, optionally overriding the timeout
    pub fn poll_settings(&self, timeout: Option<Duration>) -> PollSettings {
        PollSettings {
            timeout: timeout.unwrap_or(self.wait_timeout),
            initial_interval: self.initial_poll_interval,
            max_interval: self.max_poll_interval,
        }
    }
}

impl OnlineDdlConfigBuilder {
    /// Create a development configuration with a short timeout
    pub fn development() -> Self {
        OnlineDdlConfigBuilder::new()
            .wait_timeout(Duration::from_secs(120))
            .initial_poll_interval(Duration::from_secs(1))
            .max_poll_interval(Duration::from_secs(10))
    }

    /// Create a production configuration with conservative polling
    pub fn production() -> Self {
        OnlineDdlConfigBuilder::new()
            .wait_timeout(Duration::from_secs(1800)) // 30 minutes
            .initial_poll_interval(Duration::from_secs(2))
            .max_poll_interval(Duration::from_secs(60))
    }

    /// Create a testing configuration with minimal delays
    pub fn testing() -> Self {
        OnlineDdlConfigBuilder::new()
            .wait_timeout(Duration::from_secs(10))
            .initial_poll_interval(Duration::from_millis(10))
            .max_poll_interval(Duration::from_millis(100))
    }
}

fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_env_seconds(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue {
                field: key.to_string(),
                value,
                expected: "a whole number of seconds".to_string(),
            }),
        Err(_) => Ok(default),
    }
}
