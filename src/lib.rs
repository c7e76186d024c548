#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tasker Coordinator
//!
//! Distributed task-execution coordinator for a cluster of worker nodes.
//!
//! ## Overview
//!
//! Runs units of work ("tasks") so that each task key executes on at most one node at
//! a time, leader-only tasks run only on the elected leader, failing downstream
//! operations are isolated behind circuit breakers, and transient failures are retried
//! with exponential backoff under hard per-attempt deadlines.
//!
//! ## Architecture
//!
//! Every form of exclusion in the system is a **lease**: a lock with an owner, an
//! expiry and a monotonically increasing fence token. Task locks and the election
//! lock live in the same [`LockManager`](locking::LockManager); the election lock's
//! fence token is the leader generation.
//!
//! ## Key Features
//!
//! - **Fenced lease locks**: re-entrant acquisition, renewal, idempotent release,
//!   passive expiry and stale-token detection
//! - **Leader election**: follower/candidate/leader roles with term-scoped
//!   cancellation tokens and generation fencing
//! - **Circuit breakers**: closed/open/half-open with a single half-open trial
//! - **Bounded retries**: per-attempt timeouts, jittered exponential backoff and
//!   cancellable waits
//! - **Structured events**: every transition is published on a broadcast channel and
//!   logged with `tracing`
//!
//! ## Module Organization
//!
//! - [`locking`] - Lease locks and fence tokens
//! - [`election`] - Leader election and node membership
//! - [`resilience`] - Circuit breakers and their manager
//! - [`execution`] - Task bodies, cancellation, backoff and the retry scheduler
//! - [`orchestration`] - The node-level task coordinator
//! - [`models`] - Task records, attempts and requests
//! - [`state_machine`] - Task and attempt statuses
//! - [`events`] - Coordination events and the publisher
//! - [`registry`] - Named task types
//! - [`config`] - Layered, validated configuration
//! - [`clock`] - Time sources
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tasker_coordinator::config::CoordinatorConfig;
//! use tasker_coordinator::execution::task_fn;
//! use tasker_coordinator::models::TaskRequest;
//! use tasker_coordinator::orchestration::TaskCoordinator;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = TaskCoordinator::new(CoordinatorConfig::default())?;
//! coordinator.start()?;
//!
//! let body = task_fn(|ctx| async move { Ok(json!({"attempt": ctx.attempt})) });
//! let record = coordinator
//!     .submit_task(TaskRequest::new("job-1", body).with_max_retries(3))
//!     .await?;
//! println!("{} finished as {}", record.key, record.status);
//!
//! coordinator.shutdown(coordinator.config().shutdown.timeout()).await;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod constants;
pub mod election;
pub mod error;
pub mod events;
pub mod execution;
pub mod locking;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod resilience;
pub mod state_machine;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ConfigManager, CoordinatorConfig};
pub use constants::{status_groups, system, AttemptStatus, TaskStatus};
// Re-export constants events with different name to avoid conflict
pub use constants::events as event_names;
pub use error::{CoordinatorError, ElectionError, LockError, Result};
pub use events::{CoordinationEvent, EventPublisher};
pub use execution::{task_fn, TaskBody, TaskContext};
pub use locking::{FenceToken, LockManager};
pub use models::{TaskRecord, TaskRequest};
pub use orchestration::TaskCoordinator;
