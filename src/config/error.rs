//! Configuration Error Types
//!
//! Errors raised while loading, merging and validating coordinator configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Base configuration file does not exist
    #[error("Configuration file not found: {}", path.display())]
    ConfigFileNotFound { path: PathBuf },

    /// File could not be parsed or merged
    #[error("Parse error for configuration source '{source_name}': {reason}")]
    ParseError { source_name: String, reason: String },

    /// Environment variable override could not be applied
    #[error("Environment override error for key {key}: {reason}")]
    EnvironmentOverrideError { key: String, reason: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// Configuration validation errors
    #[error("Configuration validation failed: {error}")]
    ValidationError { error: String },
}

impl ConfigurationError {
    pub fn config_file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ConfigFileNotFound { path: path.into() }
    }

    pub fn parse_error(source_name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ParseError {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }

    pub fn validation_error(error: impl Into<String>) -> Self {
        Self::ValidationError {
            error: error.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(error: config::ConfigError) -> Self {
        match error {
            config::ConfigError::NotFound(key) => Self::EnvironmentOverrideError {
                key,
                reason: "value not found".to_string(),
            },
            config::ConfigError::FileParse { uri, cause } => Self::ParseError {
                source_name: uri.unwrap_or_else(|| "<unknown>".to_string()),
                reason: cause.to_string(),
            },
            other => Self::ParseError {
                source_name: "merged configuration".to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigurationError>;
