use crate::election::LeaderInfo;
use crate::locking::LockStatistics;
use crate::resilience::CircuitState;
use crate::state_machine::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Point-in-time view of a coordinator node, for dashboards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub node_id: String,
    pub is_leader: bool,
    pub leader: Option<LeaderInfo>,
    pub accepting_tasks: bool,
    pub total_tasks: usize,
    /// Tasks submitted and not yet finished, including their lock release
    pub in_flight_tasks: usize,
    pub tasks_by_status: HashMap<TaskStatus, usize>,
    pub locks: LockStatistics,
    pub circuit_states: HashMap<CircuitState, usize>,
    pub circuit_health_score: f64,
    pub events_published: u64,
    pub collected_at: DateTime<Utc>,
}

impl CoordinatorStats {
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks_by_status.get(&status).copied().unwrap_or_default()
    }
}

/// Outcome of a graceful shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Tasks that finished on their own within the timeout
    pub drained: bool,
    /// Tasks still running at the timeout and cancelled
    pub cancelled_tasks: usize,
}
