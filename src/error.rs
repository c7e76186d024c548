//! Error types for the coordinator.
//!
//! Each subsystem reports its own `thiserror` enum; [`CoordinatorError`] wraps them
//! for the public task API. Contention (`AlreadyHeld`, open circuits) is expected
//! and logged at info level by callers; ownership loss means protected work must stop.

use crate::config::ConfigurationError;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised by the lock manager
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("Lock '{key}' is held by '{holder}' until {expires_at}")]
    AlreadyHeld {
        key: String,
        holder: String,
        expires_at: DateTime<Utc>,
    },

    /// Owner or fence token mismatch, or the lease lapsed before the call
    #[error("'{owner}' does not hold lock '{key}' with fence token {fence_token}")]
    NotOwnerOrExpired {
        key: String,
        owner: String,
        fence_token: u64,
    },

    /// The presented fence token no longer denotes the live holder
    #[error("Stale fence token {fence_token} for lock '{key}' (current: {current:?})")]
    StaleFence {
        key: String,
        fence_token: u64,
        current: Option<u64>,
    },

    #[error("Invalid lease for lock '{key}': {reason}")]
    InvalidLease { key: String, reason: String },

    #[error("Wait for lock '{key}' was cancelled")]
    WaitCancelled { key: String },
}

impl LockError {
    /// Contention is an expected outcome rather than a fault
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::AlreadyHeld { .. })
    }

    /// The caller's lease is gone and protected work must stop
    pub fn is_ownership_lost(&self) -> bool {
        matches!(
            self,
            Self::NotOwnerOrExpired { .. } | Self::StaleFence { .. }
        )
    }
}

/// Errors raised by the leader elector
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ElectionError {
    #[error("Node '{node_id}' is not the leader")]
    NotLeader { node_id: String },

    #[error("Stale leader generation {presented} (current: {current:?})")]
    StaleGeneration {
        presented: u64,
        current: Option<u64>,
    },

    #[error("Node '{node_id}' is not eligible for leadership")]
    NotEligible { node_id: String },

    #[error("Election lock error: {0}")]
    Lock(#[from] LockError),
}

/// Crate-level error returned by the coordinator API
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Election error: {0}")]
    Election(#[from] ElectionError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Circuit breaker '{0}' is open")]
    CircuitOpen(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Task '{key}' is already active")]
    TaskAlreadyActive { key: String },

    #[error("Task '{key}' not found")]
    TaskNotFound { key: String },

    #[error("No task type registered under '{0}'")]
    UnknownTaskType(String),

    #[error("State transition error: {0}")]
    StateTransitionError(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Coordinator is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(error: serde_json::Error) -> Self {
        CoordinatorError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

impl From<tokio::task::JoinError> for CoordinatorError {
    fn from(error: tokio::task::JoinError) -> Self {
        CoordinatorError::Internal(format!("Task join error: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_error_classification() {
        let held = LockError::AlreadyHeld {
            key: "job-1".to_string(),
            holder: "node-a".to_string(),
            expires_at: Utc::now(),
        };
        assert!(held.is_contention());
        assert!(!held.is_ownership_lost());

        let lost = LockError::NotOwnerOrExpired {
            key: "job-1".to_string(),
            owner: "node-b".to_string(),
            fence_token: 3,
        };
        assert!(lost.is_ownership_lost());
        assert!(lost.to_string().contains("fence token 3"));
    }

    #[test]
    fn test_coordinator_error_from_lock_error() {
        let err: CoordinatorError = LockError::WaitCancelled {
            key: "job-1".to_string(),
        }
        .into();
        assert!(matches!(err, CoordinatorError::Lock(_)));
        assert!(err.to_string().starts_with("Lock error"));
    }
}
