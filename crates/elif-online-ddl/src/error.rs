//! Error types for online DDL tracking
//!
//! Waiting on server-side jobs never fails (see [`crate::poller::WaitOutcome`]);
//! the errors here cover the surrounding connection traffic: capability probes,
//! session variables, and the statements a migration unit submits.

use thiserror::Error;

/// Result type alias for online DDL operations
pub type OnlineDdlResult<T> = Result<T, OnlineDdlError>;

/// Error types for online DDL operations
#[derive(Error, Debug)]
pub enum OnlineDdlError {
    /// Database connection or query error
    #[error("Database error: {0}")]
    Database(String),

    #[error("Failed to connect to database")]
    Connect(#[source] sqlx::Error),

    /// Query rejected by the driver or server; the driver error is the source
    #[error("Database query failed")]
    Query(#[source] sqlx::Error),

    /// A result column could not be decoded
    #[error("Failed to decode column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Session variable bookkeeping failed
    #[error("Session error: {0}")]
    Session(String),

    /// A migration unit body failed
    #[error("Migration error: {0}")]
    Migration(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Logging could not be initialized
    #[error("Logging error: {0}")]
    Logging(String),
}

impl From<sqlx::Error> for OnlineDdlError {
    fn from(err: sqlx::Error) -> Self {
        OnlineDdlError::Query(err)
    }
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Invalid value for {field}: '{value}', expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Validation failed for {field}: {reason}")]
    ValidationFailed { field: String, reason: String },
}

/// Render an error together with its source chain, one cause per line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str("\n  caused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts() {
        let err: OnlineDdlError = ConfigError::MissingEnvVar {
            var: "ELIF_DDL_STRATEGY".to_string(),
        }
        .into();

        assert_eq!(
            err.to_string(),
            "Configuration error: Missing required environment variable: ELIF_DDL_STRATEGY"
        );
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let err = OnlineDdlError::Configuration(ConfigError::ValidationFailed {
            field: "max_poll_interval".to_string(),
            reason: "must not be zero".to_string(),
        });

        let chain = error_chain(&err);
        assert!(chain.starts_with("Configuration error:"));
        assert!(chain.contains("caused by: Validation failed for max_poll_interval"));
    }

    #[test]
    fn test_sqlx_error_is_kept_as_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = OnlineDdlError::from(sqlx::Error::Io(io));

        assert_eq!(err.to_string(), "Database query failed");
        let chain = error_chain(&err);
        assert!(chain.starts_with("Database query failed\n  caused by: "));
        assert!(chain.contains("reset by peer"));
    }
}
