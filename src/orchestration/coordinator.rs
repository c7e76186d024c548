//! # Task Coordinator
//!
//! ## Architecture: Lease-Fenced Task Execution
//!
//! The TaskCoordinator is the node-level entry point. It owns every registry the node
//! uses (locks, node membership, leader election, circuit breakers, task types and
//! task records) and drives each submitted task through the same pipeline:
//!
//! ```text
//! submit ─▶ validate ─▶ register record ─▶ [cluster-wide: require leadership]
//!        ─▶ acquire task lock (bounded wait) ─▶ lease keeper renews in background
//!        ─▶ RetryScheduler (breaker gate, attempts, backoff) ─▶ release lock
//! ```
//!
//! ## Key Features
//!
//! - **Mutual exclusion** per task key through the [`LockManager`], with fence tokens
//!   re-validated before every attempt
//! - **Leader-only tasks**: cluster-wide tasks run under the leadership term token, so
//!   losing leadership cancels them immediately
//! - **Bounded concurrency** via a semaphore sized by `execution.max_concurrent_tasks`
//! - **Graceful shutdown**: stop accepting, drain up to a timeout, cancel the rest,
//!   resign leadership
//!
//! Several coordinators can share one [`LockManager`] and [`NodeRegistry`] to model a
//! cluster in a single process; see [`TaskCoordinatorBuilder`].

use super::lease_keeper::LeaseKeeper;
use super::types::{CoordinatorStats, ShutdownReport};
use crate::clock::{to_chrono, SharedClock, SystemClock};
use crate::config::CoordinatorConfig;
use crate::constants::{lock_owner_node, task_lock_key, task_lock_owner};
use crate::election::{LeaderElector, LeaderInfo, NodeRegistry};
use crate::error::{CoordinatorError, LockError, Result};
use crate::events::{CoordinationEvent, EventPublisher};
use crate::execution::{
    FencingGuard, RetryPolicy, RetryScheduler, SharedTaskBody, TaskCancellation,
};
use crate::locking::LockManager;
use crate::logging::log_coordinator_operation;
use crate::models::{SharedTaskRecord, TaskRecord, TaskRequest};
use crate::registry::TaskRegistry;
use crate::resilience::CircuitBreakerManager;
use crate::state_machine::TaskStatus;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A registered task and the handle that cancels it
#[derive(Debug, Clone)]
struct TaskEntry {
    record: SharedTaskRecord,
    cancellation: TaskCancellation,
}

/// A task that passed validation and registration, ready to be driven
struct PreparedTask {
    entry: TaskEntry,
    body: SharedTaskBody,
    payload: Value,
    policy: RetryPolicy,
    /// Leader generation captured at submission, for cluster-wide tasks
    leadership: Option<u64>,
    cluster_wide: bool,
    _in_flight: InFlightGuard,
}

/// Decrements the in-flight count however the task ends
struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Builder for [`TaskCoordinator`]
pub struct TaskCoordinatorBuilder {
    config: CoordinatorConfig,
    clock: Option<SharedClock>,
    events: Option<EventPublisher>,
    locks: Option<Arc<LockManager>>,
    nodes: Option<Arc<NodeRegistry>>,
}

impl TaskCoordinatorBuilder {
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    /// Share a lock manager with other coordinators in this process
    pub fn lock_manager(mut self, locks: Arc<LockManager>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Share node membership with other coordinators in this process
    pub fn node_registry(mut self, nodes: Arc<NodeRegistry>) -> Self {
        self.nodes = Some(nodes);
        self
    }

    pub fn build(self) -> Result<Arc<TaskCoordinator>> {
        self.config.validate()?;

        let config = self.config;
        let node_id = config.resolved_node_id();
        let clock = self
            .clock
            .or_else(|| self.locks.as_ref().map(|locks| locks.clock().clone()))
            .unwrap_or_else(SystemClock::shared);
        let events = self
            .events
            .unwrap_or_else(|| EventPublisher::from_config(&config.events));

        let locks = self.locks.unwrap_or_else(|| {
            Arc::new(
                LockManager::with_config(clock.clone(), config.locks.clone())
                    .with_events(events.clone()),
            )
        });
        let nodes = self.nodes.unwrap_or_else(|| {
            Arc::new(NodeRegistry::new(
                config.election.heartbeat_interval(),
                clock.clone(),
            ))
        });

        let shutdown = CancellationToken::new();
        let elector = Arc::new(
            LeaderElector::new(
                node_id.clone(),
                config.election.clone(),
                locks.clone(),
                nodes.clone(),
            )
            .with_events(events.clone())
            .with_shutdown_token(shutdown.clone()),
        );
        let breakers = Arc::new(
            CircuitBreakerManager::new(config.circuit_breakers.clone(), clock.clone())
                .with_events(events.clone()),
        );
        let scheduler = RetryScheduler::new(clock.clone()).with_events(events.clone());

        info!(
            node_id = %node_id,
            max_concurrent_tasks = config.execution.max_concurrent_tasks,
            "🏗️ COORDINATOR: Created task coordinator"
        );

        Ok(Arc::new(TaskCoordinator {
            permits: Arc::new(Semaphore::new(config.execution.max_concurrent_tasks)),
            node_id,
            config,
            clock,
            events,
            locks,
            nodes,
            elector,
            breakers,
            registry: TaskRegistry::new(),
            scheduler,
            tasks: DashMap::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            shutdown,
            accepting: AtomicBool::new(true),
            started: AtomicBool::new(false),
            background: Mutex::new(Vec::new()),
        }))
    }
}

/// Node-level task coordinator
#[derive(Debug)]
pub struct TaskCoordinator {
    node_id: String,
    config: CoordinatorConfig,
    clock: SharedClock,
    events: EventPublisher,
    locks: Arc<LockManager>,
    nodes: Arc<NodeRegistry>,
    elector: Arc<LeaderElector>,
    breakers: Arc<CircuitBreakerManager>,
    registry: TaskRegistry,
    scheduler: RetryScheduler,
    tasks: DashMap<String, TaskEntry>,
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    /// Parent of every task and leadership token
    shutdown: CancellationToken,
    accepting: AtomicBool,
    started: AtomicBool,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskCoordinator {
    pub fn builder(config: CoordinatorConfig) -> TaskCoordinatorBuilder {
        TaskCoordinatorBuilder {
            config,
            clock: None,
            events: None,
            locks: None,
            nodes: None,
        }
    }

    /// Standalone coordinator with its own registries and the system clock
    pub fn new(config: CoordinatorConfig) -> Result<Arc<Self>> {
        Self::builder(config).build()
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn node_registry(&self) -> &Arc<NodeRegistry> {
        &self.nodes
    }

    pub fn elector(&self) -> &Arc<LeaderElector> {
        &self.elector
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    pub fn task_registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn is_leader(&self) -> bool {
        self.elector.is_leader()
    }

    pub fn current_leader(&self) -> Option<LeaderInfo> {
        self.elector.current_leader()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Run a task to a terminal status and return its final record
    ///
    /// Errors only when the request is rejected outright (invalid, duplicate key,
    /// shutting down). Every accepted task returns a record in SUCCEEDED, FAILED or
    /// CANCELLED.
    #[instrument(skip(self, request), fields(node_id = %self.node_id, task_key = %request.key))]
    pub async fn submit_task(&self, request: TaskRequest) -> Result<TaskRecord> {
        let prepared = self.prepare(request)?;
        Ok(self.drive(prepared).await)
    }

    /// Like [`submit_task`](Self::submit_task), running in the background
    ///
    /// Rejections are reported before anything is spawned.
    pub fn spawn_task(self: &Arc<Self>, request: TaskRequest) -> Result<JoinHandle<TaskRecord>> {
        let prepared = self.prepare(request)?;
        let coordinator = Arc::clone(self);
        Ok(tokio::spawn(async move { coordinator.drive(prepared).await }))
    }

    pub fn register_task_type(&self, name: impl Into<String>, body: SharedTaskBody) -> Result<()> {
        self.registry.register(name, body)
    }

    /// Submit a task of a registered type
    pub async fn submit_registered(
        &self,
        task_type: &str,
        task_key: impl Into<String>,
        payload: Value,
    ) -> Result<TaskRecord> {
        let request = self.registry.build_request(task_type, task_key, payload)?;
        self.submit_task(request).await
    }

    /// Snapshot of a task's record
    pub fn task_status(&self, key: &str) -> Option<TaskRecord> {
        self.tasks.get(key).map(|entry| entry.record.read().clone())
    }

    /// All known task records, oldest submission first
    pub fn list_tasks(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self
            .tasks
            .iter()
            .map(|entry| entry.record.read().clone())
            .collect();
        records.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.key.cmp(&b.key)));
        records
    }

    /// Request cancellation; `Ok(false)` if the task already finished
    pub fn cancel_task(&self, key: &str) -> Result<bool> {
        let entry = self
            .tasks
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoordinatorError::TaskNotFound {
                key: key.to_string(),
            })?;

        if entry.record.read().is_terminal() {
            return Ok(false);
        }
        info!(task_key = %key, "Cancellation requested");
        entry.cancellation.cancel("cancelled by request");
        Ok(true)
    }

    /// Drop terminal records that completed more than `older_than` ago
    pub fn purge_completed(&self, older_than: Duration) -> usize {
        let cutoff = self.clock.now() - to_chrono(older_than);
        let before = self.tasks.len();
        self.tasks.retain(|_, entry| {
            let record = entry.record.read();
            !(record.is_terminal() && record.completed_at.is_some_and(|done| done <= cutoff))
        });
        let purged = before.saturating_sub(self.tasks.len());
        if purged > 0 {
            debug!(purged, "Purged completed task records");
        }
        purged
    }

    pub fn in_flight_tasks(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CoordinatorStats {
        let mut tasks_by_status: HashMap<TaskStatus, usize> = HashMap::new();
        for entry in self.tasks.iter() {
            *tasks_by_status.entry(entry.record.read().status).or_default() += 1;
        }

        CoordinatorStats {
            node_id: self.node_id.clone(),
            is_leader: self.is_leader(),
            leader: self.current_leader(),
            accepting_tasks: self.is_accepting(),
            total_tasks: self.tasks.len(),
            in_flight_tasks: self.in_flight_tasks(),
            tasks_by_status,
            locks: self.locks.statistics(),
            circuit_states: self.breakers.state_summary(),
            circuit_health_score: self.breakers.system_health_score(),
            events_published: self.events.stats().published_total,
            collected_at: self.clock.now(),
        }
    }

    /// Start the election, lock cleanup and retention loops
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(CoordinatorError::ShuttingDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(CoordinatorError::StateTransitionError(
                "coordinator is already running".to_string(),
            ));
        }

        log_coordinator_operation("start", &self.node_id, "starting", Some("background loops"));
        let mut background = self.background.lock();

        background.push(tokio::spawn(
            Arc::clone(&self.elector).run(self.shutdown.clone()),
        ));

        let locks = Arc::clone(&self.locks);
        let shutdown = self.shutdown.clone();
        let cleanup_interval = self.config.locks.cleanup_interval();
        background.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(cleanup_interval) => {
                        let evicted = locks.cleanup_expired();
                        if evicted > 0 {
                            debug!(evicted, "Lock cleanup evicted expired leases");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("Lock cleanup loop shutting down");
                        break;
                    }
                }
            }
        }));

        let coordinator = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let purge_interval = self.config.shutdown.purge_interval();
        let retention = self.config.shutdown.task_retention();
        background.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(purge_interval) => {
                        match coordinator.upgrade() {
                            Some(coordinator) => {
                                coordinator.purge_completed(retention);
                            }
                            None => break,
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("Task retention loop shutting down");
                        break;
                    }
                }
            }
        }));

        info!("✅ COORDINATOR: Background loops started");
        Ok(())
    }

    /// Stop accepting work, drain, cancel stragglers and resign leadership
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.accepting.store(false, Ordering::SeqCst);
        info!(
            in_flight = self.in_flight_tasks(),
            timeout_ms = timeout.as_millis() as u64,
            "🛑 COORDINATOR: Shutting down"
        );

        let drained = self.wait_for_drain(timeout).await;
        let cancelled_tasks = if drained { 0 } else { self.in_flight_tasks() };
        if !drained {
            warn!(
                remaining = cancelled_tasks,
                "Shutdown timeout reached, cancelling remaining tasks"
            );
        }

        self.shutdown.cancel();
        if !drained && !self.wait_for_drain(timeout).await {
            warn!(remaining = self.in_flight_tasks(), "Tasks still winding down after cancellation");
        }

        let handles: Vec<JoinHandle<()>> = self.background.lock().drain(..).collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Background loop ended abnormally");
            }
        }
        self.elector.resign();

        info!(drained, cancelled_tasks, "✅ COORDINATOR: Shutdown complete");
        log_coordinator_operation(
            "shutdown",
            &self.node_id,
            if drained { "drained" } else { "cancelled" },
            None,
        );
        ShutdownReport {
            drained,
            cancelled_tasks,
        }
    }

    async fn wait_for_drain(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.in_flight_tasks() > 0 {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok()
    }

    /// Validate and register a request
    fn prepare(&self, request: TaskRequest) -> Result<PreparedTask> {
        if !self.is_accepting() || self.shutdown.is_cancelled() {
            return Err(CoordinatorError::ShuttingDown);
        }
        request.validate()?;

        let execution = &self.config.execution;
        let policy = RetryPolicy {
            max_retries: request.max_retries.unwrap_or(execution.max_retries),
            per_attempt_timeout: request
                .per_attempt_timeout
                .unwrap_or_else(|| execution.per_attempt_timeout()),
            max_circuit_open_waits: execution.max_circuit_open_waits,
            backoff: self.config.backoff.clone(),
        };

        let cluster_wide = request.is_cluster_wide();
        let leadership = if cluster_wide {
            self.elector
                .leadership_token()
                .zip(self.elector.generation())
        } else {
            None
        };

        let cancellation = match &leadership {
            Some((term, _)) => TaskCancellation::child_of(term)
                .with_source(self.shutdown.clone(), "coordinator shutting down")
                .with_source(term.clone(), "leadership lost"),
            None => TaskCancellation::child_of(&self.shutdown)
                .with_source(self.shutdown.clone(), "coordinator shutting down"),
        };

        let record = TaskRecord::new(
            request.key.clone(),
            request.operation_name(),
            request.scope,
            policy.max_retries,
            self.node_id.clone(),
            self.clock.now(),
        )
        .into_shared();
        let entry = TaskEntry {
            record,
            cancellation,
        };

        match self.tasks.entry(request.key.clone()) {
            Entry::Occupied(mut existing) => {
                if !existing.get().record.read().is_terminal() {
                    return Err(CoordinatorError::TaskAlreadyActive {
                        key: request.key.clone(),
                    });
                }
                existing.insert(entry.clone());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry.clone());
            }
        }

        info!(
            task_key = %request.key,
            scope = %request.scope,
            max_retries = policy.max_retries,
            "📥 Task submitted"
        );
        self.events.publish_event(CoordinationEvent::TaskSubmitted {
            task_key: request.key.clone(),
            cluster_wide,
        });

        Ok(PreparedTask {
            entry,
            body: request.body,
            payload: request.payload,
            policy,
            leadership: leadership.map(|(_, generation)| generation),
            cluster_wide,
            _in_flight: InFlightGuard::new(Arc::clone(&self.in_flight)),
        })
    }

    /// Take a registered task through lock, execution and release
    async fn drive(&self, prepared: PreparedTask) -> TaskRecord {
        let PreparedTask {
            entry,
            body,
            payload,
            policy,
            leadership,
            cluster_wide,
            _in_flight,
        } = prepared;
        let TaskEntry {
            record,
            cancellation,
        } = entry;
        let (task_key, task_id) = {
            let record = record.read();
            (record.key.clone(), record.task_id)
        };

        if cluster_wide && leadership.is_none() {
            let reason = match self.current_leader() {
                Some(leader) => format!("not leader (current leader: {})", leader.node_id),
                None => "not leader (no current leader)".to_string(),
            };
            info!(task_key = %task_key, "Cluster-wide task refused: {}", reason);
            self.scheduler
                .complete_task(&record, TaskStatus::Cancelled, Some(reason));
            return Self::snapshot(&record);
        }

        let _permit = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.scheduler.complete_task(
                        &record,
                        TaskStatus::Cancelled,
                        Some("coordinator shutting down".to_string()),
                    );
                    return Self::snapshot(&record);
                }
            },
            _ = cancellation.cancelled() => {
                self.scheduler
                    .complete_task(&record, TaskStatus::Cancelled, cancellation.reason());
                return Self::snapshot(&record);
            }
        };

        let lock_key = task_lock_key(&task_key);
        let lock_owner = task_lock_owner(&self.node_id, task_id);
        let lease = self.config.locks.lease_duration();
        let acquired = self
            .locks
            .acquire_with_wait(
                &lock_key,
                &lock_owner,
                lease,
                self.config.locks.lock_wait_timeout(),
                cancellation.token(),
            )
            .await;

        let fence_token = match acquired {
            Ok(token) => token,
            Err(e) => {
                let reason = match &e {
                    LockError::AlreadyHeld { holder, .. } => {
                        format!(
                            "task lock '{lock_key}' held by {}",
                            lock_owner_node(holder)
                        )
                    }
                    LockError::WaitCancelled { .. } => cancellation
                        .reason()
                        .unwrap_or_else(|| "cancelled".to_string()),
                    other => other.to_string(),
                };
                info!(task_key = %task_key, reason = %reason, "Task lock unavailable");
                self.scheduler
                    .complete_task(&record, TaskStatus::Cancelled, Some(reason));
                return Self::snapshot(&record);
            }
        };

        {
            let mut record = record.write();
            record.fence_token = Some(fence_token.value());
            record.leader_generation = leadership;
        }

        let mut fencing = FencingGuard::new(lock_key.clone(), fence_token, Arc::clone(&self.locks));
        if let Some(generation) = leadership {
            fencing = fencing.with_leadership(Arc::clone(&self.elector), generation);
        }

        let keeper = LeaseKeeper::spawn(
            Arc::clone(&self.locks),
            lock_key.clone(),
            lock_owner.clone(),
            fence_token,
            lease,
            self.config.locks.renewal_interval(),
            cancellation.clone(),
        );

        let breaker = self.breakers.get_circuit_breaker(&record.read().operation);
        let status = self
            .scheduler
            .run_task(
                &record,
                body,
                payload,
                &breaker,
                &policy,
                &cancellation,
                Some(fencing),
            )
            .await;

        keeper.stop().await;
        if let Err(e) = self.locks.release(&lock_key, &lock_owner, fence_token) {
            warn!(task_key = %task_key, error = %e, "Task lock was lost before release");
        }

        debug!(task_key = %task_key, status = %status, "Task finished");
        Self::snapshot(&record)
    }

    fn snapshot(record: &SharedTaskRecord) -> TaskRecord {
        record.read().clone()
    }
}
