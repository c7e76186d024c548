use crate::constants::system::DEFAULT_ELECTION_KEY;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Per-node election role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionRole {
    Follower,
    /// Attempting to acquire the election lock
    Candidate,
    Leader,
}

impl fmt::Display for ElectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Follower => write!(f, "follower"),
            Self::Candidate => write!(f, "candidate"),
            Self::Leader => write!(f, "leader"),
        }
    }
}

/// Cluster leader as recorded on the election lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderInfo {
    pub node_id: String,
    /// Fence token of the election lock; increases every time leadership changes hands
    pub generation: u64,
    pub elected_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Local view of the election for dashboards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadershipStatus {
    pub node_id: String,
    pub role: ElectionRole,
    pub is_leader: bool,
    pub generation: Option<u64>,
    pub leader: Option<LeaderInfo>,
}

/// Configuration for lease-based leader election
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Lock key all nodes campaign on
    pub election_key: String,
    /// Lease on the election lock
    pub lease_duration_ms: u64,
    /// Leader renewal cadence, well below the lease
    pub renewal_interval_ms: u64,
    /// Base delay before a follower campaigns again
    pub retry_interval_ms: u64,
    /// Random extra delay added to `retry_interval_ms` to spread out campaigns
    pub retry_jitter_ms: u64,
    /// Membership heartbeat cadence; nodes are stale after three missed beats
    pub heartbeat_interval_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            election_key: DEFAULT_ELECTION_KEY.to_string(),
            lease_duration_ms: 15_000,
            renewal_interval_ms: 5_000,
            retry_interval_ms: 100,
            retry_jitter_ms: 400,
            heartbeat_interval_ms: 5_000,
        }
    }
}

impl ElectionConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn renewal_interval(&self) -> Duration {
        Duration::from_millis(self.renewal_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Follower retry delay with jitter applied
    pub fn jittered_retry_interval(&self) -> Duration {
        let jitter = if self.retry_jitter_ms > 0 {
            fastrand::u64(0..=self.retry_jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.retry_interval_ms + jitter)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.election_key.trim().is_empty() {
            return Err("election.election_key must not be empty".to_string());
        }
        if self.lease_duration_ms == 0 {
            return Err("election.lease_duration_ms must be greater than 0".to_string());
        }
        if self.renewal_interval_ms == 0 || self.renewal_interval_ms >= self.lease_duration_ms {
            return Err(format!(
                "election.renewal_interval_ms ({}) must be between 1 and lease_duration_ms ({})",
                self.renewal_interval_ms, self.lease_duration_ms
            ));
        }
        if self.retry_interval_ms == 0 {
            return Err("election.retry_interval_ms must be greater than 0".to_string());
        }
        if self.heartbeat_interval_ms == 0 {
            return Err("election.heartbeat_interval_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_renewal_is_a_third_of_lease() {
        let config = ElectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.renewal_interval() * 3, config.lease_duration());
    }

    #[test]
    fn test_jittered_retry_interval_bounds() {
        let config = ElectionConfig::default();
        for _ in 0..100 {
            let delay = config.jittered_retry_interval();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[test]
    fn test_validation_rejects_renewal_at_lease() {
        let config = ElectionConfig {
            renewal_interval_ms: 15_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
