//! Property-based checks of lock exclusion, fencing, leader generations and backoff.

mod common;

use common::strategies::*;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tasker_coordinator::clock::ManualClock;
use tasker_coordinator::election::{ElectionConfig, LeaderElector, NodeRegistry};
use tasker_coordinator::execution::BackoffConfig;
use tasker_coordinator::{FenceToken, LockError, LockManager};

const KEY: &str = "task_lock:prop";

/// Reference model of a single lock key, in milliseconds since the test started
#[derive(Debug, Default)]
struct LockModel {
    now_ms: u64,
    holder: Option<(usize, u64)>,
    expires_ms: u64,
    last_token: u64,
}

impl LockModel {
    fn live_holder(&self) -> Option<usize> {
        self.holder
            .filter(|_| self.expires_ms > self.now_ms)
            .map(|(owner, _)| owner)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn lock_history_matches_model(history in lock_history_strategy()) {
        let clock = Arc::new(ManualClock::new());
        let locks = LockManager::new(clock.clone());
        let mut model = LockModel::default();

        for op in history {
            match op {
                LockOp::Acquire { owner, lease_ms } => {
                    let result = locks.acquire(KEY, OWNERS[owner], Duration::from_millis(lease_ms));
                    match model.live_holder() {
                        Some(holder) if holder != owner => {
                            prop_assert!(
                                matches!(result, Err(LockError::AlreadyHeld { .. })),
                                "expected contention, got {:?}", result
                            );
                        }
                        Some(_) => {
                            prop_assert_eq!(result, Ok(FenceToken(model.last_token)));
                            model.expires_ms = model.now_ms + lease_ms;
                        }
                        None => {
                            let token = result.expect("free lock must be granted");
                            prop_assert!(token.value() > model.last_token);
                            prop_assert_eq!(token.value(), model.last_token + 1);
                            model.last_token = token.value();
                            model.holder = Some((owner, token.value()));
                            model.expires_ms = model.now_ms + lease_ms;
                        }
                    }
                }
                LockOp::Renew { owner, lease_ms } => {
                    let token = FenceToken(model.last_token);
                    let result = locks.renew(KEY, OWNERS[owner], token, Duration::from_millis(lease_ms));
                    if model.live_holder() == Some(owner) {
                        prop_assert!(result.is_ok());
                        model.expires_ms = model.now_ms + lease_ms;
                    } else {
                        prop_assert!(result.is_err());
                    }
                }
                LockOp::Release { owner } => {
                    let result = locks.release(KEY, OWNERS[owner], FenceToken(model.last_token));
                    match model.live_holder() {
                        Some(holder) if holder == owner => {
                            prop_assert!(result.is_ok());
                            model.holder = None;
                        }
                        Some(_) => prop_assert!(result.is_err()),
                        None => {
                            prop_assert!(result.is_ok());
                            model.holder = None;
                        }
                    }
                }
                LockOp::Advance { ms } => {
                    clock.advance(Duration::from_millis(ms));
                    model.now_ms += ms;
                }
                LockOp::Cleanup => {
                    locks.cleanup_expired();
                }
            }

            prop_assert!(locks.active_locks().len() <= 1);
            let observed = locks.info(KEY).map(|info| info.owner_id);
            let expected = model.live_holder().map(|owner| OWNERS[owner].to_string());
            prop_assert_eq!(observed, expected);
        }
    }

    #[test]
    fn leader_generations_strictly_increase(
        steps in prop::collection::vec((0usize..3, 0u8..3, 0u64..4_000), 1..50)
    ) {
        let clock = Arc::new(ManualClock::new());
        let locks = Arc::new(LockManager::new(clock.clone()));
        let registry = Arc::new(NodeRegistry::new(Duration::from_secs(1), clock.clone()));
        let config = ElectionConfig {
            lease_duration_ms: 3_000,
            renewal_interval_ms: 1_000,
            retry_jitter_ms: 0,
            ..ElectionConfig::default()
        };
        let electors: Vec<LeaderElector> = OWNERS
            .iter()
            .map(|id| LeaderElector::new(*id, config.clone(), locks.clone(), registry.clone()))
            .collect();

        let mut highest_generation = 0u64;
        let mut current: Option<(usize, u64)> = None;

        for (node, action, advance_ms) in steps {
            match action {
                0 => { let _ = electors[node].campaign(); }
                1 => { electors[node].tick(); }
                _ => electors[node].resign(),
            }
            clock.advance(Duration::from_millis(advance_ms));

            let leaders: Vec<(usize, u64)> = electors
                .iter()
                .enumerate()
                .filter_map(|(i, e)| e.generation().map(|g| (i, g)))
                .collect();
            prop_assert!(leaders.len() <= 1, "split brain: {:?}", leaders);

            if let Some((leader, generation)) = leaders.first().copied() {
                if current != Some((leader, generation)) {
                    prop_assert!(generation > highest_generation);
                    highest_generation = generation;
                    current = Some((leader, generation));
                }
            }
        }
    }

    #[test]
    fn backoff_is_bounded_and_non_decreasing_without_jitter(
        base in 1u64..1_000,
        extra in 0u64..50_000,
        multiplier in 1.0f64..4.0,
        jitter in 0.0f64..=1.0,
        attempt in 1u32..200,
    ) {
        let config = BackoffConfig {
            base_delay_ms: base,
            max_delay_ms: base + extra,
            multiplier,
            jitter_factor: jitter,
        };
        prop_assert!(config.validate().is_ok());

        let delay = config.delay_for(attempt);
        prop_assert!(delay <= config.max_delay());
        prop_assert!(delay >= config.delay_ceiling(attempt));
        prop_assert!(config.delay_ceiling(attempt + 1) >= config.delay_ceiling(attempt));
    }
}
