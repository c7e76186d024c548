use crate::state_machine::AttemptStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One execution of a task body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAttempt {
    pub task_key: String,
    /// 1-based
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    /// `started_at + per_attempt_timeout`
    pub deadline: DateTime<Utc>,
    pub status: AttemptStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TaskAttempt {
    pub fn start(
        task_key: impl Into<String>,
        attempt_number: u32,
        started_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            task_key: task_key.into(),
            attempt_number,
            started_at,
            deadline,
            status: AttemptStatus::Running,
            completed_at: None,
            error: None,
        }
    }

    /// Record the outcome; an attempt is only finished once
    pub fn finish(&mut self, status: AttemptStatus, error: Option<String>, at: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.error = error;
        self.completed_at = Some(at);
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds().max(0) as u64)
    }
}
