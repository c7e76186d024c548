use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Monotonic per-key token issued on every new acquisition of a lock
///
/// Downstream resources compare tokens and reject writes carrying a lower one, which
/// keeps a paused or partitioned former holder from clobbering the current holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FenceToken(pub u64);

impl FenceToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<FenceToken> for u64 {
    fn from(token: FenceToken) -> Self {
        token.0
    }
}

/// Snapshot of a live lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub key: String,
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub fence_token: FenceToken,
}

impl LockInfo {
    /// A lock whose lease has lapsed is unlocked regardless of the recorded owner
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Lock service counters for dashboards
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatistics {
    pub active_locks: usize,
    pub tracked_keys: usize,
    pub acquisitions: u64,
    pub renewals: u64,
    pub releases: u64,
    pub contentions: u64,
    pub expirations: u64,
    pub ownership_losses: u64,
}

/// Configuration for lease locks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockManagerConfig {
    /// Lease granted to task execution locks
    pub lease_duration_ms: u64,
    /// How often holders renew their lease (well below the lease)
    pub renewal_interval_ms: u64,
    /// How long a submission waits for a contended task lock
    pub lock_wait_timeout_ms: u64,
    /// Poll interval while waiting for a contended lock
    pub acquire_poll_interval_ms: u64,
    /// Background sweep of expired leases
    pub cleanup_interval_ms: u64,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            lease_duration_ms: 30_000,
            renewal_interval_ms: 10_000,
            lock_wait_timeout_ms: 0,
            acquire_poll_interval_ms: 100,
            cleanup_interval_ms: 60_000,
        }
    }
}

impl LockManagerConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn renewal_interval(&self) -> Duration {
        Duration::from_millis(self.renewal_interval_ms)
    }

    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }

    pub fn acquire_poll_interval(&self) -> Duration {
        Duration::from_millis(self.acquire_poll_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.lease_duration_ms == 0 {
            return Err("locks.lease_duration_ms must be greater than 0".to_string());
        }
        if self.renewal_interval_ms == 0 || self.renewal_interval_ms >= self.lease_duration_ms {
            return Err(format!(
                "locks.renewal_interval_ms ({}) must be between 1 and lease_duration_ms ({})",
                self.renewal_interval_ms, self.lease_duration_ms
            ));
        }
        if self.acquire_poll_interval_ms == 0 {
            return Err("locks.acquire_poll_interval_ms must be greater than 0".to_string());
        }
        if self.cleanup_interval_ms == 0 {
            return Err("locks.cleanup_interval_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}
