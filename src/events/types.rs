//! Structured coordination events.
//!
//! Every lock, leadership, breaker, attempt and task transition is described by a
//! [`CoordinationEvent`]. The publisher turns it into a `(name, context)` pair where
//! `name` is one of [`crate::constants::events`] and `context` is the JSON form of the
//! variant's fields.

use crate::constants::events;
use crate::state_machine::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinationEvent {
    LockAcquired {
        key: String,
        owner: String,
        fence_token: u64,
        expires_at: DateTime<Utc>,
    },
    LockRenewed {
        key: String,
        owner: String,
        fence_token: u64,
        expires_at: DateTime<Utc>,
    },
    LockReleased {
        key: String,
        owner: String,
        fence_token: u64,
    },
    LockExpired {
        key: String,
        owner: String,
        fence_token: u64,
    },
    LockContended {
        key: String,
        requester: String,
        holder: String,
    },
    LockOwnershipLost {
        key: String,
        owner: String,
        fence_token: u64,
    },
    LeaderElected {
        node_id: String,
        generation: u64,
        expires_at: DateTime<Utc>,
    },
    LeaderRenewed {
        node_id: String,
        generation: u64,
        expires_at: DateTime<Utc>,
    },
    LeaderLost {
        node_id: String,
        generation: u64,
        reason: String,
    },
    LeaderRelinquished {
        node_id: String,
        generation: u64,
    },
    CircuitOpened {
        name: String,
        consecutive_failures: u32,
        failure_rate: f64,
    },
    CircuitHalfOpened {
        name: String,
    },
    CircuitClosed {
        name: String,
    },
    CircuitRejected {
        name: String,
        retry_after_ms: u64,
    },
    AttemptStarted {
        task_key: String,
        attempt: u32,
        deadline: DateTime<Utc>,
    },
    AttemptSucceeded {
        task_key: String,
        attempt: u32,
        duration_ms: u64,
    },
    AttemptFailed {
        task_key: String,
        attempt: u32,
        error: String,
    },
    AttemptTimedOut {
        task_key: String,
        attempt: u32,
        timeout_ms: u64,
    },
    AttemptCancelled {
        task_key: String,
        attempt: u32,
        reason: String,
    },
    TaskSubmitted {
        task_key: String,
        cluster_wide: bool,
    },
    RetryScheduled {
        task_key: String,
        next_attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    TaskCompleted {
        task_key: String,
        status: TaskStatus,
        attempts: u32,
        last_error: Option<String>,
    },
}

impl CoordinationEvent {
    /// Dotted event name used on the broadcast channel
    pub fn name(&self) -> &'static str {
        match self {
            Self::LockAcquired { .. } => events::LOCK_ACQUIRED,
            Self::LockRenewed { .. } => events::LOCK_RENEWED,
            Self::LockReleased { .. } => events::LOCK_RELEASED,
            Self::LockExpired { .. } => events::LOCK_EXPIRED,
            Self::LockContended { .. } => events::LOCK_CONTENDED,
            Self::LockOwnershipLost { .. } => events::LOCK_OWNERSHIP_LOST,
            Self::LeaderElected { .. } => events::LEADER_ELECTED,
            Self::LeaderRenewed { .. } => events::LEADER_RENEWED,
            Self::LeaderLost { .. } => events::LEADER_LOST,
            Self::LeaderRelinquished { .. } => events::LEADER_RELINQUISHED,
            Self::CircuitOpened { .. } => events::CIRCUIT_OPENED,
            Self::CircuitHalfOpened { .. } => events::CIRCUIT_HALF_OPENED,
            Self::CircuitClosed { .. } => events::CIRCUIT_CLOSED,
            Self::CircuitRejected { .. } => events::CIRCUIT_REJECTED,
            Self::AttemptStarted { .. } => events::ATTEMPT_STARTED,
            Self::AttemptSucceeded { .. } => events::ATTEMPT_SUCCEEDED,
            Self::AttemptFailed { .. } => events::ATTEMPT_FAILED,
            Self::AttemptTimedOut { .. } => events::ATTEMPT_TIMED_OUT,
            Self::AttemptCancelled { .. } => events::ATTEMPT_CANCELLED,
            Self::TaskSubmitted { .. } => events::TASK_SUBMITTED,
            Self::RetryScheduled { .. } => events::TASK_RETRY_SCHEDULED,
            Self::TaskCompleted { .. } => events::TASK_COMPLETED,
        }
    }

    /// JSON context, including the `type` discriminator
    pub fn context(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Key of the lock or task this event concerns, if any
    pub fn subject_key(&self) -> Option<&str> {
        match self {
            Self::LockAcquired { key, .. }
            | Self::LockRenewed { key, .. }
            | Self::LockReleased { key, .. }
            | Self::LockExpired { key, .. }
            | Self::LockContended { key, .. }
            | Self::LockOwnershipLost { key, .. } => Some(key),
            Self::AttemptStarted { task_key, .. }
            | Self::AttemptSucceeded { task_key, .. }
            | Self::AttemptFailed { task_key, .. }
            | Self::AttemptTimedOut { task_key, .. }
            | Self::AttemptCancelled { task_key, .. }
            | Self::TaskSubmitted { task_key, .. }
            | Self::RetryScheduled { task_key, .. }
            | Self::TaskCompleted { task_key, .. } => Some(task_key),
            Self::CircuitOpened { name, .. }
            | Self::CircuitHalfOpened { name }
            | Self::CircuitClosed { name }
            | Self::CircuitRejected { name, .. } => Some(name),
            Self::LeaderElected { .. }
            | Self::LeaderRenewed { .. }
            | Self::LeaderLost { .. }
            | Self::LeaderRelinquished { .. } => None,
        }
    }
}
