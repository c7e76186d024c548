//! Coordinator and task body builders shared by the integration tests.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tasker_coordinator::clock::{SharedClock, SystemClock};
use tasker_coordinator::config::CoordinatorConfig;
use tasker_coordinator::election::NodeRegistry;
use tasker_coordinator::execution::{task_fn, SharedTaskBody, TaskContext};
use tasker_coordinator::{LockManager, TaskCoordinator};

/// Fast-cycling configuration for a named node
pub fn test_config(node_id: &str) -> CoordinatorConfig {
    CoordinatorConfig {
        node_id: Some(node_id.to_string()),
        ..CoordinatorConfig::for_testing()
    }
}

pub fn single_node(node_id: &str) -> Arc<TaskCoordinator> {
    TaskCoordinator::new(test_config(node_id)).expect("valid test configuration")
}

/// Coordinators sharing one lock manager and membership registry
pub struct TestCluster {
    pub clock: SharedClock,
    pub locks: Arc<LockManager>,
    pub nodes: Arc<NodeRegistry>,
    pub members: Vec<Arc<TaskCoordinator>>,
}

impl TestCluster {
    pub fn new(node_ids: &[&str]) -> Self {
        Self::with_config(node_ids, test_config)
    }

    pub fn with_config(node_ids: &[&str], config_for: impl Fn(&str) -> CoordinatorConfig) -> Self {
        let clock = SystemClock::shared();
        let base = config_for(node_ids.first().copied().unwrap_or("node-a"));
        let locks = Arc::new(LockManager::with_config(clock.clone(), base.locks.clone()));
        let nodes = Arc::new(NodeRegistry::new(
            base.election.heartbeat_interval(),
            clock.clone(),
        ));

        let members = node_ids
            .iter()
            .map(|node_id| {
                TaskCoordinator::builder(config_for(node_id))
                    .clock(clock.clone())
                    .lock_manager(locks.clone())
                    .node_registry(nodes.clone())
                    .build()
                    .expect("valid test configuration")
            })
            .collect();

        Self {
            clock,
            locks,
            nodes,
            members,
        }
    }

    pub fn node(&self, index: usize) -> &Arc<TaskCoordinator> {
        &self.members[index]
    }

    /// Members currently claiming leadership
    pub fn leaders(&self) -> Vec<&Arc<TaskCoordinator>> {
        self.members.iter().filter(|m| m.is_leader()).collect()
    }
}

/// Fails `failures` times, then succeeds; counts every call
pub fn flaky_body(failures: u32, calls: Arc<AtomicU32>) -> SharedTaskBody {
    task_fn(move |ctx: TaskContext| {
        let calls = calls.clone();
        async move {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= failures {
                anyhow::bail!("transient failure {call}");
            }
            Ok(json!({"attempt": ctx.attempt}))
        }
    })
}

pub fn failing_body(calls: Arc<AtomicU32>) -> SharedTaskBody {
    task_fn(move |ctx: TaskContext| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("downstream unavailable (attempt {})", ctx.attempt)
        }
    })
}

pub fn succeeding_body(output: Value) -> SharedTaskBody {
    task_fn(move |_ctx: TaskContext| {
        let output = output.clone();
        async move { Ok(output) }
    })
}

/// Sleeps for `duration` unless cancelled first
pub fn sleeping_body(duration: Duration) -> SharedTaskBody {
    task_fn(move |ctx: TaskContext| async move {
        tokio::select! {
            _ = ctx.cancellation.cancelled() => anyhow::bail!("interrupted"),
            _ = tokio::time::sleep(duration) => Ok(Value::Null),
        }
    })
}

/// Ignores cancellation entirely
pub fn stuck_body() -> SharedTaskBody {
    task_fn(|_ctx: TaskContext| async move {
        tokio::time::sleep(Duration::from_secs(86_400)).await;
        Ok(Value::Null)
    })
}
