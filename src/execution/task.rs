//! # Task Bodies
//!
//! A task body is the unit of user work the coordinator runs, once per attempt. Bodies
//! implement [`TaskBody`] (or are plain async closures wrapped with [`task_fn`]) and
//! receive a [`TaskContext`] describing the attempt.
//!
//! ## Usage Pattern:
//!
//! ```rust
//! use tasker_coordinator::execution::{task_fn, TaskContext};
//! use serde_json::json;
//!
//! let body = task_fn(|ctx: TaskContext| async move {
//!     if ctx.is_cancelled() {
//!         anyhow::bail!("stopped before starting");
//!     }
//!     Ok(json!({"attempt": ctx.attempt}))
//! });
//! # let _ = body;
//! ```
//!
//! Long-running bodies should watch [`TaskContext::cancellation`]: it fires at the
//! attempt deadline and on external cancellation, shortly before the body's tokio
//! task is aborted. Bodies that write to external systems should call
//! [`TaskContext::check_fencing`] before each side effect.

use crate::election::LeaderElector;
use crate::error::Result;
use crate::locking::{FenceToken, LockManager};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Work executed by the coordinator
#[async_trait]
pub trait TaskBody: Send + Sync + 'static {
    /// Run one attempt; an `Err` counts as a failed attempt
    async fn execute(&self, ctx: TaskContext) -> anyhow::Result<Value>;
}

pub type SharedTaskBody = Arc<dyn TaskBody>;

/// Adapter turning an async closure into a [`TaskBody`]
pub struct FnTaskBody<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskBody for FnTaskBody<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn execute(&self, ctx: TaskContext) -> anyhow::Result<Value> {
        (self.f)(ctx).await
    }
}

/// Wrap an async closure as a shared task body
pub fn task_fn<F, Fut>(f: F) -> SharedTaskBody
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnTaskBody { f })
}

/// Proof that the attempt still runs under the authority it was started with
#[derive(Clone)]
pub struct FencingGuard {
    pub lock_key: String,
    pub fence_token: FenceToken,
    /// Present for cluster-wide tasks
    pub leader_generation: Option<u64>,
    locks: Arc<LockManager>,
    elector: Option<Arc<LeaderElector>>,
}

impl FencingGuard {
    pub fn new(lock_key: impl Into<String>, fence_token: FenceToken, locks: Arc<LockManager>) -> Self {
        Self {
            lock_key: lock_key.into(),
            fence_token,
            leader_generation: None,
            locks,
            elector: None,
        }
    }

    /// Also require leadership at `generation`
    pub fn with_leadership(mut self, elector: Arc<LeaderElector>, generation: u64) -> Self {
        self.elector = Some(elector);
        self.leader_generation = Some(generation);
        self
    }

    /// Fails once the task lock or the leader term has moved on
    pub fn validate(&self) -> Result<()> {
        self.locks.validate_fence(&self.lock_key, self.fence_token)?;
        if let (Some(elector), Some(generation)) = (&self.elector, self.leader_generation) {
            elector.validate_generation(generation)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FencingGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FencingGuard")
            .field("lock_key", &self.lock_key)
            .field("fence_token", &self.fence_token)
            .field("leader_generation", &self.leader_generation)
            .finish_non_exhaustive()
    }
}

/// Everything a body knows about the attempt it is running
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_key: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub deadline: DateTime<Utc>,
    pub payload: Value,
    pub cancellation: CancellationToken,
    pub fencing: Option<FencingGuard>,
}

impl TaskContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Confirm the lock (and leadership, for cluster-wide tasks) is still ours
    pub fn check_fencing(&self) -> Result<()> {
        match &self.fencing {
            Some(guard) => guard.validate(),
            None => Ok(()),
        }
    }
}
