//! # Orchestration Engine
//!
//! Node-level task coordination built from the lower layers:
//!
//! ```text
//! TaskCoordinator
//! ├── LockManager            (per-key execution locks, fence tokens)
//! ├── LeaderElector          (leadership lease, generations, term tokens)
//! ├── CircuitBreakerManager  (one breaker per protected operation)
//! ├── RetryScheduler         (attempts, deadlines, backoff)
//! └── TaskRegistry           (named task bodies)
//! ```
//!
//! ## Core Components
//!
//! - **TaskCoordinator**: submission, status queries, cancellation, background loops
//!   and graceful shutdown
//! - **LeaseKeeper**: renews a running task's lock and cancels the task if the lock is
//!   lost
//! - **CoordinatorStats**: dashboard snapshot of tasks, locks and circuits

pub mod coordinator;
pub mod lease_keeper;
pub mod types;

pub use coordinator::{TaskCoordinator, TaskCoordinatorBuilder};
pub use lease_keeper::LeaseKeeper;
pub use types::{CoordinatorStats, ShutdownReport};
