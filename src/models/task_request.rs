use super::task_record::TaskScope;
use crate::constants::system::MAX_RETRY_LIMIT;
use crate::error::{CoordinatorError, Result};
use crate::execution::task::SharedTaskBody;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// A request to run a task body under the coordinator
///
/// Unset limits fall back to the coordinator's execution configuration.
#[derive(Clone)]
pub struct TaskRequest {
    pub key: String,
    pub body: SharedTaskBody,
    pub payload: Value,
    pub max_retries: Option<u32>,
    pub per_attempt_timeout: Option<Duration>,
    pub scope: TaskScope,
    /// Circuit breaker name; defaults to `task:<key>`
    pub operation: Option<String>,
}

impl TaskRequest {
    pub fn new(key: impl Into<String>, body: SharedTaskBody) -> Self {
        Self {
            key: key.into(),
            body,
            payload: Value::Null,
            max_retries: None,
            per_attempt_timeout: None,
            scope: TaskScope::Local,
            operation: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout(mut self, per_attempt_timeout: Duration) -> Self {
        self.per_attempt_timeout = Some(per_attempt_timeout);
        self
    }

    pub fn with_timeout_ms(self, timeout_ms: u64) -> Self {
        self.with_timeout(Duration::from_millis(timeout_ms))
    }

    /// Only the current leader may run this task
    pub fn cluster_wide(mut self) -> Self {
        self.scope = TaskScope::ClusterWide;
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn is_cluster_wide(&self) -> bool {
        self.scope == TaskScope::ClusterWide
    }

    pub fn operation_name(&self) -> String {
        self.operation
            .clone()
            .unwrap_or_else(|| crate::constants::default_operation_name(&self.key))
    }

    /// Reject requests that could never run
    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(CoordinatorError::ValidationError(
                "task key must not be empty".to_string(),
            ));
        }
        if let Some(timeout) = self.per_attempt_timeout {
            if timeout.is_zero() {
                return Err(CoordinatorError::ValidationError(format!(
                    "task '{}' has a zero per-attempt timeout",
                    self.key
                )));
            }
        }
        if let Some(max_retries) = self.max_retries {
            if max_retries > MAX_RETRY_LIMIT {
                return Err(CoordinatorError::ValidationError(format!(
                    "task '{}' asks for {} retries, limit is {}",
                    self.key, max_retries, MAX_RETRY_LIMIT
                )));
            }
        }
        if matches!(&self.operation, Some(op) if op.trim().is_empty()) {
            return Err(CoordinatorError::ValidationError(format!(
                "task '{}' has an empty operation name",
                self.key
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for TaskRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRequest")
            .field("key", &self.key)
            .field("payload", &self.payload)
            .field("max_retries", &self.max_retries)
            .field("per_attempt_timeout", &self.per_attempt_timeout)
            .field("scope", &self.scope)
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::task::task_fn;
    use serde_json::json;

    fn noop() -> SharedTaskBody {
        task_fn(|_ctx| async { Ok(json!(null)) })
    }

    #[test]
    fn test_builder_and_defaults() {
        let request = TaskRequest::new("nightly-report", noop())
            .with_max_retries(2)
            .with_timeout_ms(500)
            .with_payload(json!({"day": "2026-10-19"}))
            .cluster_wide();

        assert!(request.is_cluster_wide());
        assert_eq!(request.operation_name(), "task:nightly-report");
        assert_eq!(request.per_attempt_timeout, Some(Duration::from_millis(500)));
        assert!(request.validate().is_ok());
        assert!(format!("{request:?}").contains("nightly-report"));
    }

    #[test]
    fn test_validation_rejects_unrunnable_requests() {
        assert!(TaskRequest::new("  ", noop()).validate().is_err());
        assert!(TaskRequest::new("job", noop())
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(TaskRequest::new("job", noop())
            .with_max_retries(MAX_RETRY_LIMIT + 1)
            .validate()
            .is_err());
        assert!(TaskRequest::new("job", noop())
            .with_operation("")
            .validate()
            .is_err());
    }
}
