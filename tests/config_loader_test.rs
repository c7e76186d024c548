//! Layered configuration loading from files and environment overrides.

use std::fs;
use std::path::PathBuf;
use tasker_coordinator::config::{ConfigManager, ConfigurationError, CoordinatorConfig};
use tasker_coordinator::TaskCoordinator;
use tempfile::TempDir;

const BASE_CONFIG: &str = r#"
node_id = "node-east-1"

[locks]
lease_duration_ms = 20000
renewal_interval_ms = 5000

[election]
election_key = "cluster:leader"

[execution]
max_retries = 5
per_attempt_timeout_ms = 10000

[backoff]
base_delay_ms = 250
max_delay_ms = 5000

[circuit_breakers.default_config]
failure_threshold = 4

[circuit_breakers.component_configs."task:billing"]
failure_threshold = 2
reset_timeout_ms = 60000
"#;

fn write_config(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write config file");
    path
}

#[test]
fn test_file_values_layer_over_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "coordinator.toml", BASE_CONFIG);

    let manager = ConfigManager::load_from_file_with_env(&path, "development").unwrap();
    let config = manager.config();

    assert_eq!(manager.environment(), "development");
    assert_eq!(manager.source_file(), Some(path.as_path()));
    assert_eq!(config.node_id.as_deref(), Some("node-east-1"));
    assert_eq!(config.locks.lease_duration_ms, 20_000);
    assert_eq!(config.election.election_key, "cluster:leader");
    assert_eq!(config.execution.max_retries, 5);
    assert_eq!(config.backoff.base_delay_ms, 250);

    let defaults = CoordinatorConfig::default();
    assert_eq!(config.election.lease_duration_ms, defaults.election.lease_duration_ms);
    assert_eq!(config.shutdown, defaults.shutdown);

    let billing = config.circuit_breakers.config_for_component("task:billing");
    assert_eq!(billing.failure_threshold, 2);
    assert_eq!(billing.reset_timeout_ms, 60_000);
    let other = config.circuit_breakers.config_for_component("task:other");
    assert_eq!(other.failure_threshold, 4);
}

#[test]
fn test_environment_file_overrides_base() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "coordinator.toml", BASE_CONFIG);
    write_config(
        &dir,
        "coordinator.production.toml",
        "[execution]\nmax_retries = 8\n\n[backoff]\njitter_factor = 0.25\n",
    );

    let production = ConfigManager::load_from_file_with_env(&path, "production").unwrap();
    assert_eq!(production.config().execution.max_retries, 8);
    assert_eq!(production.config().backoff.jitter_factor, 0.25);
    assert_eq!(production.config().backoff.base_delay_ms, 250);

    let staging = ConfigManager::load_from_file_with_env(&path, "staging").unwrap();
    assert_eq!(staging.config().execution.max_retries, 5);
}

#[test]
fn test_environment_variables_override_files() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "coordinator.toml", BASE_CONFIG);

    let mut vars = config::Map::new();
    vars.insert(
        "COORDINATOR__EXECUTION__MAX_RETRIES".to_string(),
        "2".to_string(),
    );
    vars.insert(
        "COORDINATOR__LOCKS__RENEWAL_INTERVAL_MS".to_string(),
        "4000".to_string(),
    );
    vars.insert("UNRELATED__EXECUTION__MAX_RETRIES".to_string(), "9".to_string());

    let manager = ConfigManager::load_with_overrides(&path, "test", Some(vars)).unwrap();
    assert_eq!(manager.config().execution.max_retries, 2);
    assert_eq!(manager.config().locks.renewal_interval_ms, 4_000);
    assert_eq!(manager.config().locks.lease_duration_ms, 20_000);
}

#[test]
fn test_invalid_values_are_rejected_with_context() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "coordinator.toml",
        "[locks]\nlease_duration_ms = 1000\nrenewal_interval_ms = 5000\n\n[backoff]\nbase_delay_ms = 0\n",
    );

    let err = ConfigManager::load_from_file_with_env(&path, "test").unwrap_err();
    match err {
        ConfigurationError::ValidationError { error } => {
            assert!(error.contains("renewal_interval_ms"), "{error}");
            assert!(error.contains("base_delay_ms"), "{error}");
        }
        other => panic!("expected ValidationError, got {other:?}"),
    }
}

#[test]
fn test_malformed_file_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "coordinator.toml", "[locks\nlease_duration_ms = ");

    let err = ConfigManager::load_from_file_with_env(&path, "test").unwrap_err();
    assert!(
        !matches!(
            err,
            ConfigurationError::ValidationError { .. } | ConfigurationError::ConfigFileNotFound { .. }
        ),
        "unexpected error: {err:?}"
    );
}

#[test]
fn test_blank_node_id_rejected() {
    let config = CoordinatorConfig {
        node_id: Some("   ".to_string()),
        ..CoordinatorConfig::default()
    };
    assert!(matches!(
        ConfigManager::from_config(config.clone()),
        Err(ConfigurationError::InvalidValue { .. })
    ));
    assert!(TaskCoordinator::new(config).is_err());
}

#[test]
fn test_debug_config_serializes_effective_values() {
    let manager = ConfigManager::from_config(CoordinatorConfig::for_testing()).unwrap();
    let json = manager.debug_config();
    assert_eq!(json["node_id"], "test-node");
    assert_eq!(json["locks"]["lease_duration_ms"], 2_000);
}

#[test]
fn test_shipped_configuration_is_valid() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/coordinator.toml");

    let development = ConfigManager::load_from_file_with_env(&path, "development").unwrap();
    assert_eq!(development.config().execution.max_concurrent_tasks, 100);

    let production = ConfigManager::load_from_file_with_env(&path, "production").unwrap();
    assert_eq!(production.config().execution.max_concurrent_tasks, 500);
    assert_eq!(
        production
            .config()
            .circuit_breakers
            .default_config
            .failure_rate_threshold,
        0.5
    );
}
