//! # Resilience Module
//!
//! Per-operation circuit breakers that keep a failing dependency from being
//! hammered by retries.
//!
//! ## Architecture
//!
//! - **Circuit Breakers**: CLOSED → OPEN → HALF_OPEN with a single trial call
//! - **Rolling Window**: consecutive-failure threshold plus an optional windowed failure rate
//! - **Metrics Collection**: per-breaker and system-wide snapshots for dashboards
//! - **Manager**: registry of breakers keyed by operation name with per-operation overrides
//!
//! ## Usage
//!
//! ```rust
//! use tasker_coordinator::clock::SystemClock;
//! use tasker_coordinator::resilience::{CircuitBreaker, CircuitBreakerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let circuit_breaker = CircuitBreaker::new(
//!     "payments",
//!     CircuitBreakerConfig::for_external_api(),
//!     SystemClock::shared(),
//! );
//!
//! let receipt = circuit_breaker
//!     .call(|| async { Ok::<&str, std::io::Error>("charged") })
//!     .await?;
//! assert_eq!(receipt, "charged");
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;

pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerError, CircuitRejection, CircuitState,
};
pub use config::{CircuitBreakerConfig, CircuitBreakerSettings};
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
