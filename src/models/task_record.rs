//! # Task Record
//!
//! The coordinator's record of a submitted task: its status, every attempt made,
//! and the lock fence token and leader generation it ran under. Records are shared
//! between the coordinator and the scheduler as [`SharedTaskRecord`]; every status
//! change goes through [`TaskRecord::transition`], which rejects illegal moves and
//! leaves terminal records untouched.

use super::task_attempt::TaskAttempt;
use crate::error::{CoordinatorError, Result};
use crate::state_machine::{AttemptStatus, TaskStatus};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub type SharedTaskRecord = Arc<RwLock<TaskRecord>>;

/// Whether a task may run on any node or only on the leader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskScope {
    #[default]
    Local,
    ClusterWide,
}

impl fmt::Display for TaskScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::ClusterWide => write!(f, "cluster_wide"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: Uuid,
    pub key: String,
    pub status: TaskStatus,
    pub attempts: Vec<TaskAttempt>,
    pub max_retries: u32,
    pub last_error: Option<String>,
    /// Circuit breaker protecting this task's operation
    pub operation: String,
    pub scope: TaskScope,
    /// Node that executed (or refused) the task
    pub node_id: String,
    /// Execution lock fence token held while running
    pub fence_token: Option<u64>,
    /// Leader generation a cluster-wide task was authorised under
    pub leader_generation: Option<u64>,
    /// Value returned by the successful attempt
    pub output: Option<Value>,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(
        key: impl Into<String>,
        operation: impl Into<String>,
        scope: TaskScope,
        max_retries: u32,
        node_id: impl Into<String>,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            key: key.into(),
            status: TaskStatus::Pending,
            attempts: Vec::new(),
            max_retries,
            last_error: None,
            operation: operation.into(),
            scope,
            node_id: node_id.into(),
            fence_token: None,
            leader_generation: None,
            output: None,
            submitted_at,
            completed_at: None,
        }
    }

    pub fn into_shared(self) -> SharedTaskRecord {
        Arc::new(RwLock::new(self))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `max_retries + 1`
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn current_attempt(&self) -> Option<&TaskAttempt> {
        self.attempts.last()
    }

    /// Move to `next`; staying in the same non-terminal status is a no-op
    pub fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if self.status == next && !next.is_terminal() {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(CoordinatorError::StateTransitionError(format!(
                "task '{}' cannot move from {} to {}",
                self.key, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Open a new attempt and mark the task running
    pub fn begin_attempt(
        &mut self,
        started_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Result<u32> {
        self.transition(TaskStatus::Running)?;
        let attempt_number = self.attempt_count() + 1;
        self.attempts.push(TaskAttempt::start(
            self.key.clone(),
            attempt_number,
            started_at,
            deadline,
        ));
        Ok(attempt_number)
    }

    /// Close the current attempt
    pub fn finish_attempt(
        &mut self,
        status: AttemptStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) {
        if let Some(attempt) = self.attempts.last_mut() {
            attempt.finish(status, error.clone(), at);
        }
        if status.counts_as_failure() {
            self.last_error = error;
        }
    }

    /// Move to a terminal status; a record already terminal is left unchanged
    pub fn complete(
        &mut self,
        status: TaskStatus,
        last_error: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if self.is_terminal() {
            return Err(CoordinatorError::StateTransitionError(format!(
                "task '{}' is already {}",
                self.key, self.status
            )));
        }
        self.transition(status)?;
        if let Some(attempt) = self.attempts.last_mut() {
            if !attempt.status.is_terminal() {
                attempt.finish(AttemptStatus::Cancelled, last_error.clone(), at);
            }
        }
        if last_error.is_some() {
            self.last_error = last_error;
        }
        self.completed_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TaskRecord {
        TaskRecord::new("job-1", "task:job-1", TaskScope::Local, 3, "node-a", Utc::now())
    }

    #[test]
    fn test_attempt_lifecycle() {
        let mut record = record();
        let now = Utc::now();

        let first = record
            .begin_attempt(now, now + chrono::Duration::seconds(1))
            .unwrap();
        record.finish_attempt(AttemptStatus::Failed, Some("boom".to_string()), now);
        record.transition(TaskStatus::Retrying).unwrap();
        let second = record
            .begin_attempt(now, now + chrono::Duration::seconds(1))
            .unwrap();
        record.finish_attempt(AttemptStatus::Succeeded, None, now);
        record.complete(TaskStatus::Succeeded, None, now).unwrap();

        assert_eq!((first, second), (1, 2));
        assert_eq!(record.status, TaskStatus::Succeeded);
        assert_eq!(record.last_error.as_deref(), Some("boom"));
        assert_eq!(record.max_attempts(), 4);
    }

    #[test]
    fn test_terminal_record_is_frozen() {
        let mut record = record();
        let now = Utc::now();

        record
            .complete(TaskStatus::Cancelled, Some("not leader".to_string()), now)
            .unwrap();

        assert!(record.complete(TaskStatus::Failed, None, now).is_err());
        assert!(record.transition(TaskStatus::Running).is_err());
        assert!(record.begin_attempt(now, now).is_err());
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert_eq!(record.last_error.as_deref(), Some("not leader"));
    }

    #[test]
    fn test_complete_closes_running_attempt_as_cancelled() {
        let mut record = record();
        let now = Utc::now();
        record.begin_attempt(now, now).unwrap();

        record
            .complete(TaskStatus::Cancelled, Some("ownership lost".to_string()), now)
            .unwrap();

        assert_eq!(
            record.current_attempt().unwrap().status,
            AttemptStatus::Cancelled
        );
    }
}
