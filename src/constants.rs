//! # System Constants
//!
//! Event names, well-known keys and status groupings shared by the coordination
//! components. Event names are the `name` field of every
//! [`PublishedEvent`](crate::events::PublishedEvent) and are what dashboards key on.

pub use crate::state_machine::{AttemptStatus, TaskStatus};
use uuid::Uuid;

/// Names of the structured coordination events
pub mod events {
    // Lock lifecycle events
    pub const LOCK_ACQUIRED: &str = "lock.acquired";
    pub const LOCK_RENEWED: &str = "lock.renewed";
    pub const LOCK_RELEASED: &str = "lock.released";
    pub const LOCK_EXPIRED: &str = "lock.expired";
    pub const LOCK_CONTENDED: &str = "lock.contended";
    pub const LOCK_OWNERSHIP_LOST: &str = "lock.ownership_lost";

    // Leadership events
    pub const LEADER_ELECTED: &str = "leader.elected";
    pub const LEADER_RENEWED: &str = "leader.renewed";
    pub const LEADER_LOST: &str = "leader.lost";
    pub const LEADER_RELINQUISHED: &str = "leader.relinquished";

    // Circuit breaker events
    pub const CIRCUIT_OPENED: &str = "circuit.opened";
    pub const CIRCUIT_HALF_OPENED: &str = "circuit.half_opened";
    pub const CIRCUIT_CLOSED: &str = "circuit.closed";
    pub const CIRCUIT_REJECTED: &str = "circuit.rejected";

    // Attempt lifecycle events
    pub const ATTEMPT_STARTED: &str = "attempt.started";
    pub const ATTEMPT_SUCCEEDED: &str = "attempt.succeeded";
    pub const ATTEMPT_FAILED: &str = "attempt.failed";
    pub const ATTEMPT_TIMED_OUT: &str = "attempt.timed_out";
    pub const ATTEMPT_CANCELLED: &str = "attempt.cancelled";

    // Task lifecycle events
    pub const TASK_SUBMITTED: &str = "task.submitted";
    pub const TASK_RETRY_SCHEDULED: &str = "task.retry_scheduled";
    pub const TASK_COMPLETED: &str = "task.completed";
}

/// System-wide constants
pub mod system {
    /// Lock key under which cluster leadership is elected
    pub const DEFAULT_ELECTION_KEY: &str = "coordinator:leader";

    /// Prefix applied to task keys to form their execution lock key
    pub const TASK_LOCK_PREFIX: &str = "task_lock:";

    /// Prefix applied to task keys to form their default breaker name
    pub const TASK_OPERATION_PREFIX: &str = "task:";

    /// A node is stale after missing this many heartbeat intervals
    pub const STALE_HEARTBEAT_MULTIPLIER: u32 = 3;

    /// Upper bound accepted for `max_retries`
    pub const MAX_RETRY_LIMIT: u32 = 100;

    pub const COORDINATOR_VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Status groupings for validation and reporting
pub mod status_groups {
    use super::{AttemptStatus, TaskStatus};

    /// Task statuses that end the task's life
    pub const TASK_FINAL_STATES: &[TaskStatus] = &[
        TaskStatus::Succeeded,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Task statuses that still hold (or are about to hold) the execution lock
    pub const TASK_ACTIVE_STATES: &[TaskStatus] = &[
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Retrying,
    ];

    /// Attempt outcomes that count against the circuit breaker
    pub const ATTEMPT_FAILURE_STATES: &[AttemptStatus] =
        &[AttemptStatus::Failed, AttemptStatus::TimedOut];
}

/// Lock key protecting execution of a task
pub fn task_lock_key(task_key: &str) -> String {
    format!("{}{task_key}", system::TASK_LOCK_PREFIX)
}

/// Lock owner id for a single run of a task
///
/// Unique per run, so a resubmitted key never re-enters the lease of the run before it.
pub fn task_lock_owner(node_id: &str, task_id: Uuid) -> String {
    format!("{node_id}/{task_id}")
}

/// Node that holds a task lock, given its owner id
pub fn lock_owner_node(owner_id: &str) -> &str {
    owner_id
        .rsplit_once('/')
        .map_or(owner_id, |(node_id, _)| node_id)
}

/// Breaker name used for a task that did not name its protected operation
pub fn default_operation_name(task_key: &str) -> String {
    format!("{}{task_key}", system::TASK_OPERATION_PREFIX)
}
