//! # Coordinator Configuration System
//!
//! Typed, validated configuration for a coordinator node. Every section has defaults,
//! so an empty file (or no file at all) yields a working single-node setup.
//!
//! ## Architecture
//!
//! - **Layered sources**: struct defaults, then a base TOML/YAML file, then an optional
//!   `<name>.<environment>` override file, then `COORDINATOR__SECTION__KEY`
//!   environment variables
//! - **Explicit Validation**: configuration is validated before any component sees it
//! - **Per-subsystem sections**: each subsystem owns its config type and `validate()`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tasker_coordinator::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_file("config/coordinator.toml")?;
//!
//! let lease = manager.config().locks.lease_duration();
//! let retries = manager.config().execution.max_retries;
//! # let _ = (lease, retries);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::election::ElectionConfig;
use crate::events::EventPublisherConfig;
use crate::execution::{BackoffConfig, ExecutionConfig};
use crate::locking::LockManagerConfig;
use crate::resilience::CircuitBreakerSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Graceful shutdown and record retention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long `shutdown` waits for in-flight tasks before cancelling them
    pub timeout_ms: u64,
    /// Terminal task records older than this are purged
    pub task_retention_ms: u64,
    pub purge_interval_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            task_retention_ms: 3_600_000,
            purge_interval_ms: 300_000,
        }
    }
}

impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn task_retention(&self) -> Duration {
        Duration::from_millis(self.task_retention_ms)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_millis(self.purge_interval_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.purge_interval_ms == 0 {
            return Err("shutdown.purge_interval_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Complete configuration of one coordinator node
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Stable node identity; a random id is generated when unset
    pub node_id: Option<String>,
    pub locks: LockManagerConfig,
    pub election: ElectionConfig,
    pub execution: ExecutionConfig,
    pub backoff: BackoffConfig,
    pub circuit_breakers: CircuitBreakerSettings,
    pub events: EventPublisherConfig,
    pub shutdown: ShutdownConfig,
}

impl CoordinatorConfig {
    /// Node id to run as
    pub fn resolved_node_id(&self) -> String {
        self.node_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("node-{}", uuid::Uuid::new_v4()))
    }

    /// Validate every section and the constraints between them
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if matches!(&self.node_id, Some(id) if id.trim().is_empty()) {
            return Err(ConfigurationError::invalid_value(
                "node_id",
                "",
                "node id must not be blank",
            ));
        }

        let sections = [
            self.locks.validate(),
            self.election.validate(),
            self.execution.validate(),
            self.backoff.validate(),
            self.circuit_breakers.validate(),
            self.events.validate(),
            self.shutdown.validate(),
        ];
        let errors: Vec<String> = sections.into_iter().filter_map(Result::err).collect();
        if !errors.is_empty() {
            return Err(ConfigurationError::validation_error(errors.join("; ")));
        }

        Ok(())
    }

    /// Development preset: short leases and timeouts for local runs and tests
    pub fn for_testing() -> Self {
        Self {
            node_id: Some("test-node".to_string()),
            locks: LockManagerConfig {
                lease_duration_ms: 2_000,
                renewal_interval_ms: 500,
                lock_wait_timeout_ms: 0,
                acquire_poll_interval_ms: 10,
                cleanup_interval_ms: 1_000,
            },
            election: ElectionConfig {
                lease_duration_ms: 1_500,
                renewal_interval_ms: 500,
                retry_interval_ms: 50,
                retry_jitter_ms: 50,
                heartbeat_interval_ms: 500,
                ..ElectionConfig::default()
            },
            execution: ExecutionConfig {
                per_attempt_timeout_ms: 1_000,
                ..ExecutionConfig::default()
            },
            backoff: BackoffConfig {
                base_delay_ms: 10,
                max_delay_ms: 200,
                multiplier: 2.0,
                jitter_factor: 0.0,
            },
            ..Self::default()
        }
    }
}
