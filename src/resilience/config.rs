//! # Circuit Breaker Configuration
//!
//! Per-breaker thresholds plus the process-wide settings used by the
//! [`CircuitBreakerManager`](crate::resilience::CircuitBreakerManager), including
//! per-operation overrides.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Time spent open before a half-open trial is allowed
    pub reset_timeout_ms: u64,

    /// Number of recent outcomes kept for the failure-rate check
    pub rolling_window_size: usize,

    /// Windowed failure fraction that opens the circuit once the window is full.
    /// `1.0` disables the rate check.
    pub failure_rate_threshold: f64,
}

impl CircuitBreakerConfig {
    /// Configuration for task bodies run by the retry scheduler
    pub fn for_task_execution() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout_ms: 30_000,
            rolling_window_size: 20,
            failure_rate_threshold: 0.5,
        }
    }

    /// Configuration for calls to external APIs
    pub fn for_external_api() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 45_000,
            rolling_window_size: 50,
            failure_rate_threshold: 0.5,
        }
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.failure_threshold > 100 {
            return Err("failure_threshold should not exceed 100".to_string());
        }

        if self.reset_timeout_ms == 0 {
            return Err("reset_timeout_ms must be greater than 0".to_string());
        }

        if self.reset_timeout_ms > 300_000 {
            return Err("reset_timeout_ms should not exceed 300 seconds".to_string());
        }

        if self.rolling_window_size == 0 {
            return Err("rolling_window_size must be greater than 0".to_string());
        }

        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 1.0) {
            return Err(format!(
                "failure_rate_threshold must be in (0.0, 1.0], got {}",
                self.failure_rate_threshold
            ));
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            rolling_window_size: 20,
            failure_rate_threshold: 1.0,
        }
    }
}

/// Process-wide circuit breaker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Soft cap on the number of breakers; exceeding it is logged
    pub max_circuit_breakers: usize,

    /// Configuration for operations without an override
    pub default_config: CircuitBreakerConfig,

    /// Per-operation overrides keyed by operation name
    pub component_configs: HashMap<String, CircuitBreakerConfig>,
}

impl CircuitBreakerSettings {
    /// Effective configuration for an operation
    pub fn config_for_component(&self, component_name: &str) -> CircuitBreakerConfig {
        self.component_configs
            .get(component_name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_circuit_breakers == 0 {
            return Err("max_circuit_breakers must be greater than 0".to_string());
        }

        self.default_config
            .validate()
            .map_err(|e| format!("circuit_breakers.default_config: {e}"))?;

        for (name, config) in &self.component_configs {
            config
                .validate()
                .map_err(|e| format!("circuit_breakers.component_configs.{name}: {e}"))?;
        }

        Ok(())
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            max_circuit_breakers: 1000,
            default_config: CircuitBreakerConfig::default(),
            component_configs: HashMap::new(),
        }
    }
}
