use proptest::prelude::*;

/// One step against a single lock key
#[derive(Debug, Clone)]
pub enum LockOp {
    Acquire { owner: usize, lease_ms: u64 },
    Renew { owner: usize, lease_ms: u64 },
    Release { owner: usize },
    Advance { ms: u64 },
    Cleanup,
}

pub const OWNERS: [&str; 3] = ["node-a", "node-b", "node-c"];

pub fn lease_ms_strategy() -> impl Strategy<Value = u64> {
    1u64..5_000
}

pub fn lock_op_strategy() -> impl Strategy<Value = LockOp> {
    let owner = 0..OWNERS.len();
    prop_oneof![
        4 => (owner.clone(), lease_ms_strategy())
            .prop_map(|(owner, lease_ms)| LockOp::Acquire { owner, lease_ms }),
        2 => (owner.clone(), lease_ms_strategy())
            .prop_map(|(owner, lease_ms)| LockOp::Renew { owner, lease_ms }),
        2 => owner.prop_map(|owner| LockOp::Release { owner }),
        3 => (0u64..6_000).prop_map(|ms| LockOp::Advance { ms }),
        1 => Just(LockOp::Cleanup),
    ]
}

pub fn lock_history_strategy() -> impl Strategy<Value = Vec<LockOp>> {
    prop::collection::vec(lock_op_strategy(), 1..60)
}
