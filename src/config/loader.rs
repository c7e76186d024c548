//! Configuration Loader
//!
//! Environment-aware loading built on the `config` crate. Sources are merged in
//! order, later sources overriding earlier ones:
//!
//! 1. [`CoordinatorConfig::default`]
//! 2. the base file (`coordinator.toml`, `coordinator.yaml`, ...)
//! 3. an optional sibling override named `<stem>.<environment>.<ext>`
//! 4. `COORDINATOR__<SECTION>__<KEY>` environment variables
//!
//! The merged result is validated before it is handed out.

use super::error::{ConfigResult, ConfigurationError};
use super::CoordinatorConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENV_PREFIX: &str = "COORDINATOR";
const ENV_SEPARATOR: &str = "__";

/// Loaded, validated configuration plus where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: CoordinatorConfig,
    environment: String,
    source_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Defaults plus environment variables, no file
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        let config = Self::build(None, &environment, None)?;
        Ok(Arc::new(Self::finish(config, environment, None)?))
    }

    /// Load a base file with environment auto-detection
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_file_with_env(path, &environment)
    }

    /// Load a base file for an explicit environment
    ///
    /// Useful for testing without modifying global environment variables.
    pub fn load_from_file_with_env(
        path: impl AsRef<Path>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_overrides(path, environment, None)
    }

    /// Load a base file, taking environment overrides from `vars` instead of the process
    pub fn load_with_overrides(
        path: impl AsRef<Path>,
        environment: &str,
        vars: Option<config::Map<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigurationError::config_file_not_found(path));
        }

        debug!(
            environment = environment,
            path = %path.display(),
            "Loading coordinator configuration"
        );

        let config = Self::build(Some(path), environment, vars)?;
        Ok(Arc::new(Self::finish(
            config,
            environment.to_string(),
            Some(path.to_path_buf()),
        )?))
    }

    /// Wrap an already-built configuration after validating it
    pub fn from_config(config: CoordinatorConfig) -> ConfigResult<Arc<ConfigManager>> {
        Ok(Arc::new(Self::finish(
            config,
            Self::detect_environment(),
            None,
        )?))
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }

    /// Effective configuration as JSON
    pub fn debug_config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }

    /// Environment name from `COORDINATOR_ENV`, then `APP_ENV`, defaulting to development
    pub fn detect_environment() -> String {
        env::var("COORDINATOR_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .map(|value| value.trim().to_lowercase())
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "development".to_string())
    }

    /// Path of the environment override for `base`, e.g. `coordinator.production.toml`
    pub fn environment_override_path(base: &Path, environment: &str) -> Option<PathBuf> {
        let stem = base.file_stem()?.to_str()?;
        let file_name = match base.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!("{stem}.{environment}.{ext}"),
            None => format!("{stem}.{environment}"),
        };
        Some(base.with_file_name(file_name))
    }

    fn build(
        path: Option<&Path>,
        environment: &str,
        vars: Option<config::Map<String, String>>,
    ) -> ConfigResult<CoordinatorConfig> {
        let defaults = Config::try_from(&CoordinatorConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
            if let Some(override_path) = Self::environment_override_path(path, environment) {
                if override_path.is_file() {
                    debug!(path = %override_path.display(), "Applying environment override file");
                }
                builder = builder.add_source(File::from(override_path).required(false));
            }
        }

        let environment_source = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .source(vars);
        builder = builder.add_source(environment_source);

        let config = builder.build()?.try_deserialize::<CoordinatorConfig>()?;
        Ok(config)
    }

    fn finish(
        config: CoordinatorConfig,
        environment: String,
        source_file: Option<PathBuf>,
    ) -> ConfigResult<ConfigManager> {
        config.validate()?;

        info!(
            environment = %environment,
            source = source_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "defaults".to_string()),
            lease_duration_ms = config.locks.lease_duration_ms,
            election_lease_duration_ms = config.election.lease_duration_ms,
            max_retries = config.execution.max_retries,
            "⚙️ Configuration loaded successfully"
        );

        Ok(ConfigManager {
            config,
            environment,
            source_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_override_path() {
        let base = Path::new("/etc/coordinator/coordinator.toml");
        assert_eq!(
            ConfigManager::environment_override_path(base, "production").unwrap(),
            PathBuf::from("/etc/coordinator/coordinator.production.toml")
        );
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = ConfigManager::load_from_file_with_env("/nonexistent/coordinator.toml", "test")
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::ConfigFileNotFound { .. }));
    }

    #[test]
    fn test_from_config_validates() {
        let mut config = CoordinatorConfig::default();
        config.locks.lease_duration_ms = 0;
        assert!(ConfigManager::from_config(config).is_err());
        assert!(ConfigManager::from_config(CoordinatorConfig::for_testing()).is_ok());
    }
}
