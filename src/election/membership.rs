//! # Node Registry
//!
//! Cluster membership as seen by this coordinator: each node's last heartbeat, its
//! self-reported health and its election role. A node that misses
//! [`STALE_HEARTBEAT_MULTIPLIER`] heartbeat intervals is treated as unhealthy
//! regardless of the status it last reported.

use super::types::ElectionRole;
use crate::clock::{to_chrono, SharedClock};
use crate::constants::system::STALE_HEARTBEAT_MULTIPLIER;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Healthy,
    /// Serving, but should not be preferred
    Degraded,
    /// Must not campaign for leadership
    Unhealthy,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub node_id: String,
    pub status: NodeStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub role: ElectionRole,
    pub generation: Option<u64>,
}

impl NodeHealth {
    pub fn is_stale_at(&self, now: DateTime<Utc>, heartbeat_interval: Duration) -> bool {
        let allowance = heartbeat_interval * STALE_HEARTBEAT_MULTIPLIER;
        now - self.last_heartbeat > to_chrono(allowance)
    }
}

#[derive(Debug)]
pub struct NodeRegistry {
    nodes: DashMap<String, NodeHealth>,
    heartbeat_interval: Duration,
    clock: SharedClock,
}

impl NodeRegistry {
    pub fn new(heartbeat_interval: Duration, clock: SharedClock) -> Self {
        Self {
            nodes: DashMap::new(),
            heartbeat_interval,
            clock,
        }
    }

    /// Record a heartbeat; new nodes join as healthy
    pub fn heartbeat(&self, node_id: &str, role: ElectionRole, generation: Option<u64>) {
        let now = self.clock.now();
        let mut joined = false;

        self.nodes
            .entry(node_id.to_string())
            .and_modify(|node| {
                node.last_heartbeat = now;
                node.role = role;
                node.generation = generation;
            })
            .or_insert_with(|| {
                joined = true;
                NodeHealth {
                    node_id: node_id.to_string(),
                    status: NodeStatus::Healthy,
                    last_heartbeat: now,
                    role,
                    generation,
                }
            });

        if joined {
            info!(node_id = %node_id, role = %role, "👋 Node joined cluster registry");
        } else {
            debug!(node_id = %node_id, role = %role, generation = ?generation, "💓 Node heartbeat");
        }
    }

    /// Set a node's self-reported health
    pub fn set_status(&self, node_id: &str, status: NodeStatus) {
        let now = self.clock.now();
        let previous = self.nodes.get(node_id).map(|node| node.status);

        self.nodes
            .entry(node_id.to_string())
            .and_modify(|node| node.status = status)
            .or_insert_with(|| NodeHealth {
                node_id: node_id.to_string(),
                status,
                last_heartbeat: now,
                role: ElectionRole::Follower,
                generation: None,
            });

        if previous != Some(status) {
            match status {
                NodeStatus::Unhealthy => warn!(node_id = %node_id, "🔴 Node marked unhealthy"),
                NodeStatus::Degraded => warn!(node_id = %node_id, "🟡 Node marked degraded"),
                NodeStatus::Healthy => info!(node_id = %node_id, "🟢 Node marked healthy"),
            }
        }
    }

    /// Known, fresh and not unhealthy
    pub fn is_node_healthy(&self, node_id: &str) -> bool {
        let now = self.clock.now();
        match self.nodes.get(node_id) {
            Some(node) => {
                if node.is_stale_at(now, self.heartbeat_interval) {
                    warn!(node_id = %node_id, last_heartbeat = %node.last_heartbeat, "Node is stale");
                    return false;
                }
                node.status != NodeStatus::Unhealthy
            }
            None => false,
        }
    }

    /// Whether a node may campaign; nodes without a record are assumed healthy
    pub fn is_eligible_for_leadership(&self, node_id: &str) -> bool {
        self.nodes
            .get(node_id)
            .map(|node| node.status != NodeStatus::Unhealthy)
            .unwrap_or(true)
    }

    pub fn get(&self, node_id: &str) -> Option<NodeHealth> {
        self.nodes.get(node_id).map(|node| node.clone())
    }

    pub fn healthy_nodes(&self) -> Vec<NodeHealth> {
        let now = self.clock.now();
        let mut nodes: Vec<NodeHealth> = self
            .nodes
            .iter()
            .filter(|node| {
                node.status != NodeStatus::Unhealthy
                    && !node.is_stale_at(now, self.heartbeat_interval)
            })
            .map(|node| node.clone())
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub fn all_nodes(&self) -> Vec<NodeHealth> {
        let mut nodes: Vec<NodeHealth> = self.nodes.iter().map(|node| node.clone()).collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub fn remove(&self, node_id: &str) -> bool {
        self.nodes.remove(node_id).is_some()
    }
}
