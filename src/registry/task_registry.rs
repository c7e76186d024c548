//! # Task Type Registry
//!
//! Named task bodies owned by a coordinator instance. Registering a task type lets
//! callers submit work by name (`submit_registered("send_report", key, payload)`)
//! with per-type defaults for retries, timeouts, scope and breaker name.

use crate::error::{CoordinatorError, Result};
use crate::execution::SharedTaskBody;
use crate::models::{TaskRequest, TaskScope};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Defaults applied to requests built from a registered type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefaults {
    pub max_retries: Option<u32>,
    pub per_attempt_timeout_ms: Option<u64>,
    pub scope: TaskScope,
    pub operation: Option<String>,
}

#[derive(Clone)]
struct RegisteredTask {
    body: SharedTaskBody,
    defaults: TaskDefaults,
}

/// Name → task body lookup
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<String, RegisteredTask>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a task type with default settings
    pub fn register(&self, name: impl Into<String>, body: SharedTaskBody) -> Result<()> {
        self.register_with_defaults(name, body, TaskDefaults::default())
    }

    pub fn register_with_defaults(
        &self,
        name: impl Into<String>,
        body: SharedTaskBody,
        defaults: TaskDefaults,
    ) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CoordinatorError::ValidationError(
                "task type name must not be empty".to_string(),
            ));
        }

        let replaced = self
            .tasks
            .write()
            .insert(name.clone(), RegisteredTask { body, defaults })
            .is_some();
        if replaced {
            debug!(task_type = %name, "Replaced registered task type");
        } else {
            info!(task_type = %name, "📋 Registered task type");
        }
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.tasks.write().remove(name).is_some()
    }

    pub fn resolve(&self, name: &str) -> Result<SharedTaskBody> {
        self.tasks
            .read()
            .get(name)
            .map(|task| task.body.clone())
            .ok_or_else(|| CoordinatorError::UnknownTaskType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.read().contains_key(name)
    }

    /// Registered names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Build a request for `task_key` from a registered type and its defaults
    pub fn build_request(
        &self,
        task_type: &str,
        task_key: impl Into<String>,
        payload: Value,
    ) -> Result<TaskRequest> {
        let task = self
            .tasks
            .read()
            .get(task_type)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownTaskType(task_type.to_string()))?;

        let mut request = TaskRequest::new(task_key, task.body).with_payload(payload);
        request.scope = task.defaults.scope;
        request.max_retries = task.defaults.max_retries;
        request.per_attempt_timeout = task
            .defaults
            .per_attempt_timeout_ms
            .map(Duration::from_millis);
        request.operation = task.defaults.operation;
        Ok(request)
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("task_types", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::task_fn;
    use serde_json::json;

    #[test]
    fn test_register_and_resolve() {
        let registry = TaskRegistry::new();
        registry
            .register("echo", task_fn(|ctx| async move { Ok(ctx.payload) }))
            .unwrap();

        assert!(registry.contains("echo"));
        assert!(registry.resolve("echo").is_ok());
        assert!(matches!(
            registry.resolve("missing"),
            Err(CoordinatorError::UnknownTaskType(name)) if name == "missing"
        ));
        assert!(registry
            .register("", task_fn(|_| async { Ok(Value::Null) }))
            .is_err());
    }

    #[test]
    fn test_build_request_applies_defaults() {
        let registry = TaskRegistry::new();
        registry
            .register_with_defaults(
                "nightly_rollup",
                task_fn(|_| async { Ok(Value::Null) }),
                TaskDefaults {
                    max_retries: Some(1),
                    per_attempt_timeout_ms: Some(250),
                    scope: TaskScope::ClusterWide,
                    operation: Some("warehouse".to_string()),
                },
            )
            .unwrap();

        let request = registry
            .build_request("nightly_rollup", "rollup-2026-10-19", json!({"day": 19}))
            .unwrap();

        assert_eq!(request.key, "rollup-2026-10-19");
        assert!(request.is_cluster_wide());
        assert_eq!(request.max_retries, Some(1));
        assert_eq!(request.per_attempt_timeout, Some(Duration::from_millis(250)));
        assert_eq!(request.operation_name(), "warehouse");
        assert_eq!(registry.list(), vec!["nightly_rollup".to_string()]);
        assert!(registry.unregister("nightly_rollup"));
    }
}
