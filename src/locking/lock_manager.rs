//! # Lock Manager
//!
//! ## Architecture: Fenced Lease Locks
//!
//! Named mutual-exclusion locks with TTL leases. Each key maps to a single DashMap
//! entry, and every state transition for a key runs while that entry is held, so
//! acquire/renew/release on one key are linearizable while different keys never
//! contend with each other.
//!
//! ## Key Features
//!
//! - **At most one owner**: a lease is live while `expires_at > now`; a lapsed lease
//!   is free regardless of the owner recorded on it
//! - **Re-entrant acquire**: the live owner acquiring again renews in place and keeps
//!   its fence token
//! - **Fencing**: every new acquisition increments the key's fence token. Records are
//!   retained after release and expiry so tokens never repeat for a key
//! - **Passive expiry**: no timer is needed for correctness; `cleanup_expired` only
//!   tidies up and reports expirations
//!
//! ## Usage
//!
//! ```rust
//! use tasker_coordinator::clock::SystemClock;
//! use tasker_coordinator::locking::LockManager;
//! use std::time::Duration;
//!
//! let locks = LockManager::new(SystemClock::shared());
//! let token = locks.acquire("task_lock:job-1", "node-a", Duration::from_secs(30)).unwrap();
//! assert!(locks.is_held("task_lock:job-1"));
//! locks.release("task_lock:job-1", "node-a", token).unwrap();
//! ```

use super::types::{FenceToken, LockInfo, LockManagerConfig, LockStatistics};
use crate::clock::{to_chrono, SharedClock};
use crate::error::LockError;
use crate::events::{CoordinationEvent, EventPublisher};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct Lease {
    owner_id: String,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Per-key record; kept after release so the fence token keeps counting
#[derive(Debug, Default)]
struct LockEntry {
    fence_token: u64,
    lease: Option<Lease>,
}

impl LockEntry {
    fn live_lease(&self, now: DateTime<Utc>) -> Option<&Lease> {
        self.lease.as_ref().filter(|lease| lease.expires_at > now)
    }

    fn info(&self, key: &str, now: DateTime<Utc>) -> Option<LockInfo> {
        self.live_lease(now).map(|lease| LockInfo {
            key: key.to_string(),
            owner_id: lease.owner_id.clone(),
            acquired_at: lease.acquired_at,
            expires_at: lease.expires_at,
            fence_token: FenceToken(self.fence_token),
        })
    }
}

#[derive(Debug, Default)]
struct LockCounters {
    acquisitions: AtomicU64,
    renewals: AtomicU64,
    releases: AtomicU64,
    contentions: AtomicU64,
    expirations: AtomicU64,
    ownership_losses: AtomicU64,
}

/// In-memory lease lock service shared by the elector and the task coordinator
#[derive(Debug)]
pub struct LockManager {
    locks: DashMap<String, LockEntry>,
    clock: SharedClock,
    config: LockManagerConfig,
    events: Option<EventPublisher>,
    counters: LockCounters,
}

impl LockManager {
    pub fn new(clock: SharedClock) -> Self {
        Self::with_config(clock, LockManagerConfig::default())
    }

    pub fn with_config(clock: SharedClock, config: LockManagerConfig) -> Self {
        Self {
            locks: DashMap::new(),
            clock,
            config,
            events: None,
            counters: LockCounters::default(),
        }
    }

    /// Publish lock transitions on the given publisher
    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &LockManagerConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Acquire `key` for `owner_id`, or renew it if `owner_id` already holds it
    ///
    /// Non-blocking. Returns the key's fence token, which only changes on a new
    /// acquisition.
    pub fn acquire(
        &self,
        key: &str,
        owner_id: &str,
        lease_duration: Duration,
    ) -> Result<FenceToken, LockError> {
        self.acquire_lease(key, owner_id, lease_duration)
            .map(|lease| lease.fence_token)
    }

    /// Like [`acquire`](Self::acquire), but returns the granted lease
    ///
    /// `expires_at` is computed from the same instant the grant was decided at.
    pub fn acquire_lease(
        &self,
        key: &str,
        owner_id: &str,
        lease_duration: Duration,
    ) -> Result<LockInfo, LockError> {
        self.try_acquire(key, owner_id, lease_duration, true)
    }

    fn try_acquire(
        &self,
        key: &str,
        owner_id: &str,
        lease_duration: Duration,
        report_contention: bool,
    ) -> Result<LockInfo, LockError> {
        validate_lease(key, lease_duration)?;

        let now = self.clock.now();
        let expires_at = now + to_chrono(lease_duration);
        let mut published = Vec::with_capacity(2);

        let outcome = {
            let mut entry = self.locks.entry(key.to_string()).or_default();

            match entry.live_lease(now).map(|lease| lease.owner_id.clone()) {
                Some(holder) if holder == owner_id => {
                    let acquired_at = match entry.lease.as_mut() {
                        Some(lease) => {
                            lease.expires_at = expires_at;
                            lease.acquired_at
                        }
                        None => now,
                    };
                    self.counters.renewals.fetch_add(1, Ordering::Relaxed);
                    published.push(CoordinationEvent::LockRenewed {
                        key: key.to_string(),
                        owner: owner_id.to_string(),
                        fence_token: entry.fence_token,
                        expires_at,
                    });
                    Ok(LockInfo {
                        key: key.to_string(),
                        owner_id: holder,
                        acquired_at,
                        expires_at,
                        fence_token: FenceToken(entry.fence_token),
                    })
                }
                Some(holder) => {
                    let held_until = entry
                        .lease
                        .as_ref()
                        .map(|lease| lease.expires_at)
                        .unwrap_or(now);
                    if report_contention {
                        self.counters.contentions.fetch_add(1, Ordering::Relaxed);
                        published.push(CoordinationEvent::LockContended {
                            key: key.to_string(),
                            requester: owner_id.to_string(),
                            holder: holder.clone(),
                        });
                    }
                    Err(LockError::AlreadyHeld {
                        key: key.to_string(),
                        holder,
                        expires_at: held_until,
                    })
                }
                None => {
                    if let Some(stale) = entry.lease.take() {
                        self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                        published.push(CoordinationEvent::LockExpired {
                            key: key.to_string(),
                            owner: stale.owner_id,
                            fence_token: entry.fence_token,
                        });
                    }
                    entry.fence_token += 1;
                    entry.lease = Some(Lease {
                        owner_id: owner_id.to_string(),
                        acquired_at: now,
                        expires_at,
                    });
                    self.counters.acquisitions.fetch_add(1, Ordering::Relaxed);
                    published.push(CoordinationEvent::LockAcquired {
                        key: key.to_string(),
                        owner: owner_id.to_string(),
                        fence_token: entry.fence_token,
                        expires_at,
                    });
                    Ok(LockInfo {
                        key: key.to_string(),
                        owner_id: owner_id.to_string(),
                        acquired_at: now,
                        expires_at,
                        fence_token: FenceToken(entry.fence_token),
                    })
                }
            }
        };

        match &outcome {
            Ok(lease) => debug!(
                key = %key,
                owner_id = %owner_id,
                fence_token = lease.fence_token.value(),
                expires_at = %expires_at,
                "🔒 Lock granted"
            ),
            Err(LockError::AlreadyHeld { holder, .. }) if report_contention => info!(
                key = %key,
                owner_id = %owner_id,
                holder = %holder,
                "Lock contended"
            ),
            Err(_) => {}
        }
        self.publish_all(published);
        outcome
    }

    /// Extend a held lease; fails if the owner or token differ or the lease lapsed
    ///
    /// Returns the new expiry.
    pub fn renew(
        &self,
        key: &str,
        owner_id: &str,
        fence_token: FenceToken,
        lease_duration: Duration,
    ) -> Result<DateTime<Utc>, LockError> {
        validate_lease(key, lease_duration)?;

        let now = self.clock.now();
        let expires_at = now + to_chrono(lease_duration);

        let renewed = match self.locks.get_mut(key) {
            Some(mut entry) => {
                let token_matches = entry.fence_token == fence_token.value();
                match entry.lease.as_mut() {
                    Some(lease)
                        if token_matches && lease.owner_id == owner_id && lease.expires_at > now =>
                    {
                        lease.expires_at = expires_at;
                        true
                    }
                    _ => false,
                }
            }
            None => false,
        };

        if renewed {
            self.counters.renewals.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, owner_id = %owner_id, fence_token = fence_token.value(), "🔄 Lock renewed");
            self.publish(CoordinationEvent::LockRenewed {
                key: key.to_string(),
                owner: owner_id.to_string(),
                fence_token: fence_token.value(),
                expires_at,
            });
            Ok(expires_at)
        } else {
            Err(self.ownership_lost(key, owner_id, fence_token))
        }
    }

    /// Clear ownership if the caller holds the lock with this token
    ///
    /// Idempotent when the key is not held by anyone.
    pub fn release(
        &self,
        key: &str,
        owner_id: &str,
        fence_token: FenceToken,
    ) -> Result<(), LockError> {
        let now = self.clock.now();

        enum Released {
            Live,
            Lapsed(String, u64),
            Nothing,
            Mismatch,
        }

        let released = match self.locks.get_mut(key) {
            Some(mut entry) => {
                let token_matches = entry.fence_token == fence_token.value();
                let lease_state = entry
                    .lease
                    .as_ref()
                    .map(|lease| (lease.owner_id == owner_id, lease.expires_at > now));

                match lease_state {
                    None => Released::Nothing,
                    Some((true, true)) if token_matches => {
                        entry.lease = None;
                        Released::Live
                    }
                    Some((_, false)) => {
                        let previous = entry.lease.take();
                        Released::Lapsed(
                            previous.map(|l| l.owner_id).unwrap_or_default(),
                            entry.fence_token,
                        )
                    }
                    Some(_) => Released::Mismatch,
                }
            }
            None => Released::Nothing,
        };

        match released {
            Released::Live => {
                self.counters.releases.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, owner_id = %owner_id, fence_token = fence_token.value(), "🔓 Lock released");
                self.publish(CoordinationEvent::LockReleased {
                    key: key.to_string(),
                    owner: owner_id.to_string(),
                    fence_token: fence_token.value(),
                });
                Ok(())
            }
            Released::Lapsed(previous_owner, lapsed_token) => {
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                self.publish(CoordinationEvent::LockExpired {
                    key: key.to_string(),
                    owner: previous_owner,
                    fence_token: lapsed_token,
                });
                Ok(())
            }
            Released::Nothing => Ok(()),
            Released::Mismatch => Err(self.ownership_lost(key, owner_id, fence_token)),
        }
    }

    /// Whether a live lease exists for `key`
    pub fn is_held(&self, key: &str) -> bool {
        self.info(key).is_some()
    }

    /// Live lock snapshot; `None` when free or lapsed
    pub fn info(&self, key: &str) -> Option<LockInfo> {
        let now = self.clock.now();
        self.locks.get(key).and_then(|entry| entry.info(key, now))
    }

    /// Current fence token of `key`, whether or not it is held
    pub fn fence_token(&self, key: &str) -> Option<FenceToken> {
        self.locks.get(key).map(|entry| FenceToken(entry.fence_token))
    }

    /// Confirm that `fence_token` still denotes the live holder of `key`
    pub fn validate_fence(&self, key: &str, fence_token: FenceToken) -> Result<(), LockError> {
        match self.info(key) {
            Some(info) if info.fence_token == fence_token => Ok(()),
            current => Err(LockError::StaleFence {
                key: key.to_string(),
                fence_token: fence_token.value(),
                current: current.map(|info| info.fence_token.value()),
            }),
        }
    }

    /// All live locks
    pub fn active_locks(&self) -> Vec<LockInfo> {
        let now = self.clock.now();
        let mut active: Vec<LockInfo> = self
            .locks
            .iter()
            .filter_map(|entry| entry.value().info(entry.key(), now))
            .collect();
        active.sort_by(|a, b| a.key.cmp(&b.key));
        active
    }

    /// Drop lapsed leases; returns how many were evicted
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut expired = Vec::new();

        for mut entry in self.locks.iter_mut() {
            let lapsed = matches!(entry.lease.as_ref(), Some(lease) if lease.expires_at <= now);
            if lapsed {
                let fence_token = entry.fence_token;
                if let Some(lease) = entry.lease.take() {
                    expired.push(CoordinationEvent::LockExpired {
                        key: entry.key().clone(),
                        owner: lease.owner_id,
                        fence_token,
                    });
                }
            }
        }

        let count = expired.len();
        if count > 0 {
            self.counters
                .expirations
                .fetch_add(count as u64, Ordering::Relaxed);
            info!(expired = count, "🧹 Cleaned up expired locks");
        }
        self.publish_all(expired);
        count
    }

    pub fn statistics(&self) -> LockStatistics {
        LockStatistics {
            active_locks: self.active_locks().len(),
            tracked_keys: self.locks.len(),
            acquisitions: self.counters.acquisitions.load(Ordering::Relaxed),
            renewals: self.counters.renewals.load(Ordering::Relaxed),
            releases: self.counters.releases.load(Ordering::Relaxed),
            contentions: self.counters.contentions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            ownership_losses: self.counters.ownership_losses.load(Ordering::Relaxed),
        }
    }

    /// Poll `acquire` until granted, `wait_timeout` elapses or `cancel` fires
    ///
    /// A zero `wait_timeout` makes a single attempt. Contention is reported once per
    /// call rather than once per poll.
    pub async fn acquire_with_wait(
        &self,
        key: &str,
        owner_id: &str,
        lease_duration: Duration,
        wait_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<FenceToken, LockError> {
        let deadline = tokio::time::Instant::now() + wait_timeout;
        let poll_interval = self.config.acquire_poll_interval().max(Duration::from_millis(1));
        let mut first_poll = true;

        loop {
            match self.try_acquire(key, owner_id, lease_duration, first_poll) {
                Ok(lease) => return Ok(lease.fence_token),
                Err(contended @ LockError::AlreadyHeld { .. }) => {
                    first_poll = false;
                    let now = tokio::time::Instant::now();
                    if now >= deadline {
                        return Err(contended);
                    }
                    let pause = poll_interval.min(deadline - now);
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(LockError::WaitCancelled { key: key.to_string() });
                        }
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Run `work` while holding `key`, releasing afterwards even if `work` panics
    pub async fn with_lock<F, Fut, T>(
        &self,
        key: &str,
        owner_id: &str,
        lease_duration: Duration,
        wait_timeout: Duration,
        work: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce(FenceToken) -> Fut,
        Fut: Future<Output = T>,
    {
        let never = CancellationToken::new();
        let fence_token = self
            .acquire_with_wait(key, owner_id, lease_duration, wait_timeout, &never)
            .await?;

        let _guard = ReleaseOnDrop {
            locks: self,
            key,
            owner_id,
            fence_token,
        };
        Ok(work(fence_token).await)
    }

    fn ownership_lost(&self, key: &str, owner_id: &str, fence_token: FenceToken) -> LockError {
        self.counters.ownership_losses.fetch_add(1, Ordering::Relaxed);
        warn!(
            key = %key,
            owner_id = %owner_id,
            fence_token = fence_token.value(),
            "⚠️ Lock ownership lost"
        );
        self.publish(CoordinationEvent::LockOwnershipLost {
            key: key.to_string(),
            owner: owner_id.to_string(),
            fence_token: fence_token.value(),
        });
        LockError::NotOwnerOrExpired {
            key: key.to_string(),
            owner: owner_id.to_string(),
            fence_token: fence_token.value(),
        }
    }

    fn publish(&self, event: CoordinationEvent) {
        if let Some(events) = &self.events {
            events.publish_event(event);
        }
    }

    fn publish_all(&self, events: Vec<CoordinationEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

struct ReleaseOnDrop<'a> {
    locks: &'a LockManager,
    key: &'a str,
    owner_id: &'a str,
    fence_token: FenceToken,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        if let Err(e) = self
            .locks
            .release(self.key, self.owner_id, self.fence_token)
        {
            warn!(key = %self.key, error = %e, "Failed to release lock after guarded work");
        }
    }
}

fn validate_lease(key: &str, lease_duration: Duration) -> Result<(), LockError> {
    if lease_duration.is_zero() {
        return Err(LockError::InvalidLease {
            key: key.to_string(),
            reason: "lease duration must be greater than zero".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn manager() -> (Arc<ManualClock>, LockManager) {
        let clock = Arc::new(ManualClock::new());
        let locks = LockManager::new(clock.clone());
        (clock, locks)
    }

    const LEASE: Duration = Duration::from_secs(10);

    #[test]
    fn test_mutual_exclusion() {
        let (_clock, locks) = manager();

        let token = locks.acquire("k", "a", LEASE).unwrap();
        let err = locks.acquire("k", "b", LEASE).unwrap_err();

        assert!(matches!(err, LockError::AlreadyHeld { ref holder, .. } if holder == "a"));
        assert_eq!(locks.info("k").unwrap().owner_id, "a");
        assert_eq!(token, FenceToken(1));
    }

    #[test]
    fn test_reentrant_acquire_keeps_token_and_extends() {
        let (clock, locks) = manager();

        let first = locks.acquire("k", "a", LEASE).unwrap();
        let before = locks.info("k").unwrap().expires_at;
        clock.advance(Duration::from_secs(4));
        let second = locks.acquire("k", "a", LEASE).unwrap();

        assert_eq!(first, second);
        assert!(locks.info("k").unwrap().expires_at > before);
        assert_eq!(locks.statistics().renewals, 1);
    }

    #[test]
    fn test_expired_lease_is_free_and_fenced() {
        let (clock, locks) = manager();

        let stale = locks.acquire("k", "a", LEASE).unwrap();
        clock.advance(LEASE);

        assert!(!locks.is_held("k"));
        let fresh = locks.acquire("k", "b", LEASE).unwrap();
        assert!(fresh > stale);

        let err = locks.renew("k", "a", stale, LEASE).unwrap_err();
        assert!(err.is_ownership_lost());
        assert!(locks.release("k", "a", stale).is_err());
        assert_eq!(locks.info("k").unwrap().owner_id, "b");
    }

    #[test]
    fn test_renew_pushes_expiry() {
        let (clock, locks) = manager();

        let token = locks.acquire("k", "a", LEASE).unwrap();
        let original = locks.info("k").unwrap().expires_at;
        clock.advance(Duration::from_secs(5));

        let renewed = locks.renew("k", "a", token, LEASE).unwrap();

        assert_eq!(renewed, original + chrono::Duration::seconds(5));
        assert_eq!(locks.info("k").unwrap().fence_token, token);
    }

    #[test]
    fn test_renew_at_exact_expiry_fails() {
        let (clock, locks) = manager();

        let token = locks.acquire("k", "a", LEASE).unwrap();
        clock.advance(LEASE);

        assert!(locks.renew("k", "a", token, LEASE).is_err());
    }

    #[test]
    fn test_release_is_idempotent() {
        let (_clock, locks) = manager();

        let token = locks.acquire("k", "a", LEASE).unwrap();
        assert!(locks.release("k", "a", token).is_ok());
        assert!(locks.release("k", "a", token).is_ok());
        assert!(locks.release("never", "a", token).is_ok());
        assert!(!locks.is_held("k"));
    }

    #[test]
    fn test_release_by_other_owner_fails() {
        let (_clock, locks) = manager();

        let token = locks.acquire("k", "a", LEASE).unwrap();

        assert!(locks.release("k", "b", token).is_err());
        assert!(locks.is_held("k"));
    }

    #[test]
    fn test_fence_tokens_survive_release_and_cleanup() {
        let (clock, locks) = manager();

        let t1 = locks.acquire("k", "a", LEASE).unwrap();
        locks.release("k", "a", t1).unwrap();
        let t2 = locks.acquire("k", "b", LEASE).unwrap();
        clock.advance(LEASE);
        assert_eq!(locks.cleanup_expired(), 1);
        let t3 = locks.acquire("k", "a", LEASE).unwrap();

        assert!(t1 < t2 && t2 < t3);
    }

    #[test]
    fn test_zero_lease_rejected() {
        let (_clock, locks) = manager();

        let err = locks.acquire("k", "a", Duration::ZERO).unwrap_err();

        assert!(matches!(err, LockError::InvalidLease { .. }));
        assert!(locks.fence_token("k").is_none());
    }

    #[test]
    fn test_validate_fence() {
        let (clock, locks) = manager();

        let token = locks.acquire("k", "a", LEASE).unwrap();
        assert!(locks.validate_fence("k", token).is_ok());

        clock.advance(LEASE);
        let err = locks.validate_fence("k", token).unwrap_err();
        assert!(matches!(err, LockError::StaleFence { current: None, .. }));
    }

    #[test]
    fn test_statistics_and_active_locks() {
        let (_clock, locks) = manager();

        locks.acquire("b", "n1", LEASE).unwrap();
        locks.acquire("a", "n1", LEASE).unwrap();
        let _ = locks.acquire("a", "n2", LEASE);

        let stats = locks.statistics();
        assert_eq!(stats.active_locks, 2);
        assert_eq!(stats.acquisitions, 2);
        assert_eq!(stats.contentions, 1);

        let keys: Vec<String> = locks.active_locks().into_iter().map(|l| l.key).collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_with_wait_gets_lock_after_release() {
        let clock = crate::clock::SystemClock::shared();
        let locks = Arc::new(LockManager::new(clock));
        let token = locks.acquire("k", "a", LEASE).unwrap();

        let releaser = locks.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            releaser.release("k", "a", token).unwrap();
        });

        let cancel = CancellationToken::new();
        let granted = locks
            .acquire_with_wait("k", "b", LEASE, Duration::from_secs(1), &cancel)
            .await
            .unwrap();

        assert!(granted > token);
        assert_eq!(locks.statistics().contentions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_with_wait_times_out_and_cancels() {
        let locks = LockManager::new(crate::clock::SystemClock::shared());
        locks.acquire("k", "a", Duration::from_secs(60)).unwrap();

        let cancel = CancellationToken::new();
        let err = locks
            .acquire_with_wait("k", "b", LEASE, Duration::from_millis(300), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_contention());

        cancel.cancel();
        let err = locks
            .acquire_with_wait("k", "b", LEASE, Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::WaitCancelled { .. }));
    }

    #[tokio::test]
    async fn test_with_lock_releases_afterwards() {
        let (_clock, locks) = manager();

        let value = locks
            .with_lock("k", "a", LEASE, Duration::ZERO, |token| async move {
                token.value() * 10
            })
            .await
            .unwrap();

        assert_eq!(value, 10);
        assert!(!locks.is_held("k"));
    }
}
