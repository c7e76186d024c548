//! # Circuit Breaker Manager
//!
//! Registry of circuit breakers keyed by protected operation name. Owned by the
//! coordinator instance; breakers are created on first use with the operation's
//! configured override or the default configuration.

use crate::clock::SharedClock;
use crate::events::EventPublisher;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerSettings,
    CircuitState, SystemCircuitBreakerMetrics,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Manager for the circuit breakers of all protected operations
#[derive(Debug)]
pub struct CircuitBreakerManager {
    circuit_breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    settings: RwLock<CircuitBreakerSettings>,
    clock: SharedClock,
    events: Option<EventPublisher>,
}

impl CircuitBreakerManager {
    pub fn new(settings: CircuitBreakerSettings, clock: SharedClock) -> Self {
        info!(
            max_circuit_breakers = settings.max_circuit_breakers,
            overrides = settings.component_configs.len(),
            "Initializing circuit breaker manager"
        );

        Self {
            circuit_breakers: RwLock::new(HashMap::new()),
            settings: RwLock::new(settings),
            clock,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    /// Get or create circuit breaker for an operation
    pub fn get_circuit_breaker(&self, component_name: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.circuit_breakers.read();
            if let Some(breaker) = breakers.get(component_name) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.circuit_breakers.write();

        // Double-check pattern (another thread might have created it)
        if let Some(breaker) = breakers.get(component_name) {
            return Arc::clone(breaker);
        }

        let settings = self.settings.read();
        if breakers.len() >= settings.max_circuit_breakers {
            warn!(
                component = component_name,
                current_count = breakers.len(),
                max_allowed = settings.max_circuit_breakers,
                "🚨 Maximum circuit breaker limit reached"
            );
        }

        let mut breaker = CircuitBreaker::new(
            component_name,
            settings.config_for_component(component_name),
            self.clock.clone(),
        );
        if let Some(events) = &self.events {
            breaker = breaker.with_events(events.clone());
        }
        let breaker = Arc::new(breaker);

        breakers.insert(component_name.to_string(), Arc::clone(&breaker));

        info!(
            component = component_name,
            total_circuit_breakers = breakers.len(),
            "Created new circuit breaker"
        );

        breaker
    }

    /// Existing breaker, without creating one
    pub fn get(&self, component_name: &str) -> Option<Arc<CircuitBreaker>> {
        self.circuit_breakers.read().get(component_name).cloned()
    }

    /// Get all circuit breaker names
    pub fn list_components(&self) -> Vec<String> {
        let mut names: Vec<String> = self.circuit_breakers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_component_metrics(&self, component_name: &str) -> Option<CircuitBreakerMetrics> {
        self.get(component_name).map(|breaker| breaker.metrics())
    }

    /// Get system-wide circuit breaker metrics
    pub fn system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let mut system_metrics = SystemCircuitBreakerMetrics::new();

        for breaker in self.snapshot() {
            system_metrics.add_circuit_breaker(breaker.name().to_string(), breaker.metrics());
        }

        system_metrics
    }

    /// Force open all circuit breakers (emergency stop)
    pub fn force_open_all(&self) {
        warn!("🚨 Forcing all circuit breakers open (emergency stop)");
        for breaker in self.snapshot() {
            breaker.force_open();
        }
    }

    /// Force close all circuit breakers (emergency recovery)
    pub fn force_close_all(&self) {
        warn!("🚨 Forcing all circuit breakers closed (emergency recovery)");
        for breaker in self.snapshot() {
            breaker.force_closed();
        }
    }

    /// Remove circuit breaker for an operation
    pub fn remove_circuit_breaker(&self, component_name: &str) -> bool {
        let mut breakers = self.circuit_breakers.write();
        if breakers.remove(component_name).is_some() {
            info!(
                component = component_name,
                remaining_count = breakers.len(),
                "🗑️ Removed circuit breaker"
            );
            true
        } else {
            false
        }
    }

    /// Get count of circuit breakers by state
    pub fn state_summary(&self) -> HashMap<CircuitState, usize> {
        self.system_metrics().count_by_state()
    }

    /// Check overall system health based on circuit breaker states
    pub fn system_health_score(&self) -> f64 {
        self.system_metrics().health_score()
    }

    /// Set the override for an operation (applies to breakers created afterwards)
    pub fn update_component_config(&self, component_name: &str, config: CircuitBreakerConfig) {
        self.settings
            .write()
            .component_configs
            .insert(component_name.to_string(), config);

        info!(
            component = component_name,
            "⚙️ Updated circuit breaker configuration (applies to new instances)"
        );
    }

    // Breaker methods take their own locks; never call them under the map lock
    fn snapshot(&self) -> Vec<Arc<CircuitBreaker>> {
        self.circuit_breakers.read().values().cloned().collect()
    }
}
