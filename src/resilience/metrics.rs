//! # Circuit Breaker Metrics
//!
//! Snapshots of breaker state for dashboards and health checks.

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Total number of recorded outcomes
    pub total_calls: u64,

    pub success_count: u64,

    pub failure_count: u64,

    /// Current consecutive failure count
    pub consecutive_failures: u32,

    /// Calls denied while open or while a half-open trial was in flight
    pub rejected_count: u64,

    /// Number of half-open trials admitted
    pub half_open_trials: u64,

    /// Number of times the circuit opened
    pub times_opened: u64,

    /// Failures among the outcomes currently in the rolling window
    pub window_failures: usize,

    /// Outcomes currently in the rolling window
    pub window_len: usize,

    pub current_state: CircuitState,

    /// Windowed failure rate (0.0 to 1.0)
    pub failure_rate: f64,

    /// Lifetime success rate (0.0 to 1.0)
    pub success_rate: f64,

    pub opened_at: Option<DateTime<Utc>>,

    /// Milliseconds until an open circuit admits a trial
    pub retry_after_ms: Option<u64>,
}

impl CircuitBreakerMetrics {
    /// Create new metrics instance with zero values
    pub fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            rejected_count: 0,
            half_open_trials: 0,
            times_opened: 0,
            window_failures: 0,
            window_len: 0,
            current_state: CircuitState::Closed,
            failure_rate: 0.0,
            success_rate: 0.0,
            opened_at: None,
            retry_after_ms: None,
        }
    }

    /// Check if metrics indicate healthy operation
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.failure_rate < 0.1 || self.window_len < 10,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }

    /// Get human-readable state description
    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Testing system health",
        }
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "State: {} | Calls: {} | Success: {:.1}% | Failures: {} | Rejected: {} | Opened: {}x",
            self.state_description(),
            self.total_calls,
            self.success_rate * 100.0,
            self.failure_count,
            self.rejected_count,
            self.times_opened
        )
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// System-wide circuit breaker metrics aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    /// Metrics for individual circuit breakers by name
    pub circuit_breakers: HashMap<String, CircuitBreakerMetrics>,

    pub collected_at: DateTime<Utc>,
}

impl SystemCircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            circuit_breakers: HashMap::new(),
            collected_at: Utc::now(),
        }
    }

    pub fn add_circuit_breaker(&mut self, name: String, metrics: CircuitBreakerMetrics) {
        self.circuit_breakers.insert(name, metrics);
    }

    /// Get count of circuit breakers by state
    pub fn count_by_state(&self) -> HashMap<CircuitState, usize> {
        let mut counts = HashMap::new();

        for metrics in self.circuit_breakers.values() {
            *counts.entry(metrics.current_state).or_insert(0) += 1;
        }

        counts
    }

    /// Get list of unhealthy circuit breakers
    pub fn unhealthy_circuits(&self) -> Vec<(&String, &CircuitBreakerMetrics)> {
        self.circuit_breakers
            .iter()
            .filter(|(_, metrics)| !metrics.is_healthy())
            .collect()
    }

    /// Calculate system-wide health score (0.0 to 1.0)
    pub fn health_score(&self) -> f64 {
        if self.circuit_breakers.is_empty() {
            return 1.0;
        }

        let healthy_count = self
            .circuit_breakers
            .values()
            .filter(|metrics| metrics.is_healthy())
            .count();

        healthy_count as f64 / self.circuit_breakers.len() as f64
    }

    pub fn total_calls(&self) -> u64 {
        self.circuit_breakers.values().map(|m| m.total_calls).sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.circuit_breakers.values().map(|m| m.failure_count).sum()
    }

    pub fn system_failure_rate(&self) -> f64 {
        let total_calls = self.total_calls();
        if total_calls == 0 {
            return 0.0;
        }

        self.total_failures() as f64 / total_calls as f64
    }

    /// Format summary for logging
    pub fn format_summary(&self) -> String {
        let state_counts = self.count_by_state();
        let count = |state| state_counts.get(&state).copied().unwrap_or(0);

        format!(
            "Circuit Breakers: {} total | {} closed | {} open | {} half-open | Health: {:.1}% | System failure rate: {:.2}%",
            self.circuit_breakers.len(),
            count(CircuitState::Closed),
            count(CircuitState::Open),
            count(CircuitState::HalfOpen),
            self.health_score() * 100.0,
            self.system_failure_rate() * 100.0
        )
    }
}

impl Default for SystemCircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics_in(state: CircuitState, total: u64, failures: u64) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: total,
            failure_count: failures,
            success_count: total - failures,
            current_state: state,
            ..CircuitBreakerMetrics::new()
        }
    }

    #[test]
    fn test_health_score_and_state_counts() {
        let mut system = SystemCircuitBreakerMetrics::new();
        assert_eq!(system.health_score(), 1.0);

        system.add_circuit_breaker("a".to_string(), metrics_in(CircuitState::Closed, 10, 0));
        system.add_circuit_breaker("b".to_string(), metrics_in(CircuitState::Open, 10, 5));

        assert_eq!(system.health_score(), 0.5);
        assert_eq!(system.count_by_state()[&CircuitState::Open], 1);
        assert_eq!(system.unhealthy_circuits().len(), 1);
        assert_eq!(system.system_failure_rate(), 0.25);
        assert!(system.format_summary().contains("2 total"));
    }
}
