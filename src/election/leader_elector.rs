//! # Leader Elector
//!
//! ## Architecture: Leadership as a Lease
//!
//! Leadership is simply ownership of the election lock in the shared
//! [`LockManager`]. The election lock's fence token doubles as the leader
//! generation, so generations strictly increase every time leadership changes hands,
//! including when the same node is re-elected after a gap.
//!
//! ## Key Features
//!
//! - **Follower / Candidate / Leader** role machine driven by [`LeaderElector::tick`]
//! - **Renewal** at `renewal_interval` (a third of the lease by default); a failed
//!   renewal steps down immediately
//! - **Term tokens**: each term has a cancellation token, cancelled on step-down,
//!   resignation or shutdown, so leader-only work stops as soon as leadership is lost
//! - **Generation fencing**: [`LeaderElector::validate_generation`] rejects actions
//!   authorised under an earlier term
//! - **Eligibility**: nodes marked unhealthy in the [`NodeRegistry`] do not campaign

use super::membership::NodeRegistry;
use super::types::{ElectionConfig, ElectionRole, LeaderInfo, LeadershipStatus};
use crate::clock::SharedClock;
use crate::error::{ElectionError, LockError};
use crate::events::{CoordinationEvent, EventPublisher};
use crate::locking::{FenceToken, LockInfo, LockManager};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug)]
struct Term {
    generation: FenceToken,
    elected_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    token: CancellationToken,
}

#[derive(Debug)]
struct ElectorState {
    role: ElectionRole,
    term: Option<Term>,
}

/// Per-node leader election driver
#[derive(Debug)]
pub struct LeaderElector {
    node_id: String,
    config: ElectionConfig,
    locks: Arc<LockManager>,
    registry: Arc<NodeRegistry>,
    clock: SharedClock,
    events: Option<EventPublisher>,
    /// Parent of every term token; cancelling it ends any current term
    shutdown: CancellationToken,
    state: Mutex<ElectorState>,
}

impl LeaderElector {
    pub fn new(
        node_id: impl Into<String>,
        config: ElectionConfig,
        locks: Arc<LockManager>,
        registry: Arc<NodeRegistry>,
    ) -> Self {
        let clock = locks.clock().clone();
        Self {
            node_id: node_id.into(),
            config,
            locks,
            registry,
            clock,
            events: None,
            shutdown: CancellationToken::new(),
            state: Mutex::new(ElectorState {
                role: ElectionRole::Follower,
                term: None,
            }),
        }
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    /// Tie term tokens to an outer shutdown token
    pub fn with_shutdown_token(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    pub fn role(&self) -> ElectionRole {
        self.state.lock().role
    }

    /// Leader role with a lease that has not lapsed
    pub fn is_leader(&self) -> bool {
        let now = self.clock.now();
        let state = self.state.lock();
        state.role == ElectionRole::Leader
            && state.term.as_ref().is_some_and(|term| term.expires_at > now)
    }

    /// Generation of the local term, if leading
    pub fn generation(&self) -> Option<u64> {
        let now = self.clock.now();
        let state = self.state.lock();
        match (&state.role, &state.term) {
            (ElectionRole::Leader, Some(term)) if term.expires_at > now => {
                Some(term.generation.value())
            }
            _ => None,
        }
    }

    /// Cluster leader as recorded on the election lock
    pub fn current_leader(&self) -> Option<LeaderInfo> {
        self.locks.info(&self.config.election_key).map(|lock| LeaderInfo {
            node_id: lock.owner_id,
            generation: lock.fence_token.value(),
            elected_at: lock.acquired_at,
            expires_at: lock.expires_at,
        })
    }

    /// Token cancelled when the current term ends; `None` unless leading
    pub fn leadership_token(&self) -> Option<CancellationToken> {
        if !self.is_leader() {
            return None;
        }
        self.state.lock().term.as_ref().map(|term| term.token.clone())
    }

    /// Reject actions authorised under any generation but the live one
    pub fn validate_generation(&self, generation: u64) -> Result<(), ElectionError> {
        let current = self.current_leader().map(|leader| leader.generation);
        let local_matches = self.generation() == Some(generation);

        if local_matches && current == Some(generation) {
            Ok(())
        } else {
            Err(ElectionError::StaleGeneration {
                presented: generation,
                current,
            })
        }
    }

    pub fn status(&self) -> LeadershipStatus {
        LeadershipStatus {
            node_id: self.node_id.clone(),
            role: self.role(),
            is_leader: self.is_leader(),
            generation: self.generation(),
            leader: self.current_leader(),
        }
    }

    /// Single candidate attempt; `Ok(true)` when this node leads afterwards
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub fn campaign(&self) -> Result<bool, ElectionError> {
        if !self.registry.is_eligible_for_leadership(&self.node_id) {
            self.step_down("node is not eligible for leadership");
            return Err(ElectionError::NotEligible {
                node_id: self.node_id.clone(),
            });
        }

        {
            let mut state = self.state.lock();
            if state.role != ElectionRole::Leader {
                state.role = ElectionRole::Candidate;
            }
        }

        let lease = self.config.lease_duration();
        match self.locks.acquire_lease(&self.config.election_key, &self.node_id, lease) {
            Ok(granted) => {
                self.on_lease_granted(&granted);
                Ok(true)
            }
            Err(LockError::AlreadyHeld { holder, .. }) => {
                let mut state = self.state.lock();
                state.role = ElectionRole::Follower;
                debug!(leader = %holder, "Election lock held elsewhere; remaining follower");
                Ok(false)
            }
            Err(other) => {
                self.state.lock().role = ElectionRole::Follower;
                Err(other.into())
            }
        }
    }

    /// Extend the current term; steps down on failure
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub fn renew(&self) -> Result<(), ElectionError> {
        let generation = {
            let state = self.state.lock();
            match (&state.role, &state.term) {
                (ElectionRole::Leader, Some(term)) => term.generation,
                _ => {
                    return Err(ElectionError::NotLeader {
                        node_id: self.node_id.clone(),
                    })
                }
            }
        };

        match self.locks.renew(
            &self.config.election_key,
            &self.node_id,
            generation,
            self.config.lease_duration(),
        ) {
            Ok(expires_at) => {
                if let Some(term) = self.state.lock().term.as_mut() {
                    term.expires_at = expires_at;
                }
                self.publish(CoordinationEvent::LeaderRenewed {
                    node_id: self.node_id.clone(),
                    generation: generation.value(),
                    expires_at,
                });
                Ok(())
            }
            Err(e) => {
                self.step_down("lease renewal failed");
                Err(e.into())
            }
        }
    }

    /// One maintenance step; returns the delay before the next one
    pub fn tick(&self) -> Duration {
        let next = if self.role() == ElectionRole::Leader {
            if self.is_leader() {
                match self.renew() {
                    Ok(()) => self.config.renewal_interval(),
                    Err(e) => {
                        warn!(node_id = %self.node_id, error = %e, "Leadership renewal failed");
                        self.config.jittered_retry_interval()
                    }
                }
            } else {
                self.step_down("lease expired before renewal");
                self.campaign_step()
            }
        } else {
            self.campaign_step()
        };

        let (role, generation) = (self.role(), self.generation());
        self.registry.heartbeat(&self.node_id, role, generation);
        next
    }

    fn campaign_step(&self) -> Duration {
        match self.campaign() {
            Ok(true) => self.config.renewal_interval(),
            Ok(false) => self.config.jittered_retry_interval(),
            Err(ElectionError::NotEligible { .. }) => self.config.retry_interval(),
            Err(e) => {
                error!(node_id = %self.node_id, error = %e, "Election attempt failed");
                self.config.jittered_retry_interval()
            }
        }
    }

    /// Relinquish leadership if held and campaign again immediately
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub fn force_election(&self) -> Result<bool, ElectionError> {
        info!("🗳️ Forced election requested");
        self.resign();
        self.campaign()
    }

    /// Release the election lock and end the current term
    pub fn resign(&self) {
        let term = {
            let mut state = self.state.lock();
            state.role = ElectionRole::Follower;
            state.term.take()
        };

        if let Some(term) = term {
            term.token.cancel();
            if let Err(e) =
                self.locks
                    .release(&self.config.election_key, &self.node_id, term.generation)
            {
                warn!(node_id = %self.node_id, error = %e, "Election lock already lost at resignation");
            }
            info!(
                node_id = %self.node_id,
                generation = term.generation.value(),
                "👋 Leadership relinquished"
            );
            self.publish(CoordinationEvent::LeaderRelinquished {
                node_id: self.node_id.clone(),
                generation: term.generation.value(),
            });
        }
    }

    /// Maintenance loop: campaign, renew, heartbeat; resigns on shutdown
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(node_id = %self.node_id, election_key = %self.config.election_key, "🗳️ Leader election loop started");

        loop {
            let delay = self.tick();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.resign();
        info!(node_id = %self.node_id, "Leader election loop stopped");
    }

    /// Adopt a granted election lease; the local term never outlives the lock
    fn on_lease_granted(&self, granted: &LockInfo) {
        let generation = granted.fence_token;
        let expires_at = granted.expires_at;

        let newly_elected = {
            let mut state = self.state.lock();
            let same_term = state
                .term
                .as_ref()
                .is_some_and(|term| term.generation == generation && !term.token.is_cancelled());

            state.role = ElectionRole::Leader;
            if same_term {
                if let Some(term) = state.term.as_mut() {
                    term.expires_at = expires_at;
                }
                false
            } else {
                if let Some(old) = state.term.take() {
                    old.token.cancel();
                }
                state.term = Some(Term {
                    generation,
                    elected_at: granted.acquired_at,
                    expires_at,
                    token: self.shutdown.child_token(),
                });
                true
            }
        };

        if newly_elected {
            info!(
                node_id = %self.node_id,
                generation = generation.value(),
                expires_at = %expires_at,
                "👑 Elected leader"
            );
            self.publish(CoordinationEvent::LeaderElected {
                node_id: self.node_id.clone(),
                generation: generation.value(),
                expires_at,
            });
        }
    }

    fn step_down(&self, reason: &str) {
        let term = {
            let mut state = self.state.lock();
            state.role = ElectionRole::Follower;
            state.term.take()
        };

        if let Some(term) = term {
            term.token.cancel();
            warn!(
                node_id = %self.node_id,
                generation = term.generation.value(),
                elected_at = %term.elected_at,
                reason = %reason,
                "⚠️ Leadership lost"
            );
            self.publish(CoordinationEvent::LeaderLost {
                node_id: self.node_id.clone(),
                generation: term.generation.value(),
                reason: reason.to_string(),
            });
        }
    }

    fn publish(&self, event: CoordinationEvent) {
        if let Some(events) = &self.events {
            events.publish_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::election::NodeStatus;

    struct Cluster {
        clock: Arc<ManualClock>,
        locks: Arc<LockManager>,
        registry: Arc<NodeRegistry>,
    }

    impl Cluster {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new());
            Self {
                locks: Arc::new(LockManager::new(clock.clone())),
                registry: Arc::new(NodeRegistry::new(Duration::from_secs(5), clock.clone())),
                clock,
            }
        }

        fn node(&self, node_id: &str) -> LeaderElector {
            LeaderElector::new(
                node_id,
                ElectionConfig::default(),
                self.locks.clone(),
                self.registry.clone(),
            )
        }
    }

    /// Advances one millisecond on every read
    #[derive(Debug)]
    struct SteppingClock(ManualClock);

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            self.0.advance(Duration::from_millis(1));
            self.0.now()
        }
    }

    #[test]
    fn test_term_expires_with_election_lease() {
        let clock = Arc::new(SteppingClock(ManualClock::new()));
        let locks = Arc::new(LockManager::new(clock.clone()));
        let registry = Arc::new(NodeRegistry::new(Duration::from_secs(5), clock.clone()));
        let a = LeaderElector::new("node-a", ElectionConfig::default(), locks.clone(), registry);

        assert!(a.campaign().unwrap());
        let lease = locks.info(&a.config().election_key).unwrap();

        clock.0.set(lease.expires_at - chrono::Duration::milliseconds(1));
        assert!(!a.is_leader());
        assert!(locks.info(&a.config().election_key).is_none());
    }

    #[test]
    fn test_single_leader_among_candidates() {
        let cluster = Cluster::new();
        let a = cluster.node("node-a");
        let b = cluster.node("node-b");

        assert!(a.campaign().unwrap());
        assert!(!b.campaign().unwrap());

        assert!(a.is_leader());
        assert!(!b.is_leader());
        assert_eq!(b.role(), ElectionRole::Follower);
        assert_eq!(b.current_leader().unwrap().node_id, "node-a");
    }

    #[test]
    fn test_generation_increases_on_failover() {
        let cluster = Cluster::new();
        let a = cluster.node("node-a");
        let b = cluster.node("node-b");

        a.campaign().unwrap();
        let first = a.generation().unwrap();

        cluster.clock.advance(Duration::from_secs(15));
        assert!(!a.is_leader());
        assert!(b.campaign().unwrap());

        assert!(b.generation().unwrap() > first);
        assert!(a.renew().is_err());
        assert_eq!(a.role(), ElectionRole::Follower);
    }

    #[test]
    fn test_renewal_keeps_generation() {
        let cluster = Cluster::new();
        let a = cluster.node("node-a");
        a.campaign().unwrap();
        let generation = a.generation();

        for _ in 0..5 {
            cluster.clock.advance(Duration::from_secs(5));
            assert_eq!(a.tick(), Duration::from_secs(5));
        }

        assert!(a.is_leader());
        assert_eq!(a.generation(), generation);
    }

    #[test]
    fn test_step_down_cancels_term_token() {
        let cluster = Cluster::new();
        let a = cluster.node("node-a");
        a.campaign().unwrap();
        let token = a.leadership_token().unwrap();

        cluster.clock.advance(Duration::from_secs(16));
        a.tick();

        assert!(token.is_cancelled());
    }

    #[test]
    fn test_force_election_starts_new_generation() {
        let cluster = Cluster::new();
        let a = cluster.node("node-a");
        a.campaign().unwrap();
        let first = a.generation().unwrap();
        let token = a.leadership_token().unwrap();

        assert!(a.force_election().unwrap());

        assert!(token.is_cancelled());
        assert_eq!(a.generation(), Some(first + 1));
    }

    #[test]
    fn test_validate_generation_rejects_stale() {
        let cluster = Cluster::new();
        let a = cluster.node("node-a");
        a.campaign().unwrap();
        let generation = a.generation().unwrap();

        assert!(a.validate_generation(generation).is_ok());

        a.force_election().unwrap();
        let err = a.validate_generation(generation).unwrap_err();
        assert!(matches!(
            err,
            ElectionError::StaleGeneration { presented, current: Some(current) }
                if presented == generation && current == generation + 1
        ));
    }

    #[test]
    fn test_unhealthy_node_does_not_campaign() {
        let cluster = Cluster::new();
        let a = cluster.node("node-a");
        cluster.registry.set_status("node-a", NodeStatus::Unhealthy);

        assert!(matches!(
            a.campaign(),
            Err(ElectionError::NotEligible { .. })
        ));
        assert!(cluster.locks.info("coordinator:leader").is_none());
    }

    #[test]
    fn test_resign_releases_election_lock() {
        let cluster = Cluster::new();
        let a = cluster.node("node-a");
        a.campaign().unwrap();

        a.resign();

        assert!(!a.is_leader());
        assert!(a.current_leader().is_none());
        assert!(a.leadership_token().is_none());
    }

    #[test]
    fn test_tick_heartbeats_role_into_registry() {
        let cluster = Cluster::new();
        let a = cluster.node("node-a");

        a.tick();

        let health = cluster.registry.get("node-a").unwrap();
        assert_eq!(health.role, ElectionRole::Leader);
        assert_eq!(health.generation, Some(1));
    }
}
