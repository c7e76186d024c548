//! # Registry Infrastructure
//!
//! Registries owned by a coordinator instance. There are no process-wide
//! singletons: each [`TaskCoordinator`](crate::orchestration::TaskCoordinator) creates
//! its registries at construction and drops them at shutdown.
//!
//! ## Available Registries
//!
//! - **TaskRegistry**: named task bodies with per-type submission defaults
//!
//! Circuit breakers live in [`CircuitBreakerManager`](crate::resilience::CircuitBreakerManager)
//! and node health in [`NodeRegistry`](crate::election::NodeRegistry).

pub mod task_registry;

pub use task_registry::{TaskDefaults, TaskRegistry};
