//! # Leader Election
//!
//! Lease-based leader election on top of the lock manager, plus the node registry
//! that decides which nodes may campaign.

pub mod leader_elector;
pub mod membership;
pub mod types;

pub use leader_elector::LeaderElector;
pub use membership::{NodeHealth, NodeRegistry, NodeStatus};
pub use types::{ElectionConfig, ElectionRole, LeaderInfo, LeadershipStatus};
