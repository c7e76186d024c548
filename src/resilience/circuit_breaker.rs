//! # Circuit Breaker Implementation
//!
//! Fault isolation for a single protected operation, with three states: Closed
//! (normal operation), Open (failing fast) and Half-Open (one trial call probing
//! recovery).
//!
//! Every transition happens under one mutex per breaker, so concurrent callers
//! observe a single linear history: exactly one caller wins the Open → Half-Open
//! trial. Each admitted call carries an [`Admission`] stamped with the breaker's
//! epoch; the epoch moves on every open, close and trial, so a late result from a
//! call admitted before the circuit moved on is counted but never changes state.

use crate::clock::{to_chrono, until, SharedClock};
use crate::events::{CoordinationEvent, EventPublisher};
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - a single trial call is allowed
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting all calls
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen {
        component: String,
        retry_after: Option<Duration>,
    },

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),

    /// Circuit breaker configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

/// Permission for one call, returned by [`CircuitBreaker::check`]
///
/// Report the call's outcome with the same admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    epoch: u64,
    trial: bool,
}

impl Admission {
    /// Whether this call is the half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

/// A denied call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitRejection {
    pub component: String,
    pub state: CircuitState,
    /// Time until an open circuit admits a trial; `None` while a trial is in flight
    pub retry_after: Option<Duration>,
}

impl<E> From<CircuitRejection> for CircuitBreakerError<E> {
    fn from(rejection: CircuitRejection) -> Self {
        CircuitBreakerError::CircuitOpen {
            component: rejection.component,
            retry_after: rejection.retry_after,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    /// Recent outcomes, `true` for failure, bounded by `rolling_window_size`
    window: VecDeque<bool>,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
    /// Bumped on every open, close and trial admission
    epoch: u64,
    total_calls: u64,
    success_count: u64,
    failure_count: u64,
    rejected_count: u64,
    half_open_trials: u64,
    times_opened: u64,
}

impl BreakerState {
    fn new(window_size: usize) -> Self {
        Self {
            state: CircuitState::Closed,
            window: VecDeque::with_capacity(window_size),
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
            epoch: 0,
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            rejected_count: 0,
            half_open_trials: 0,
            times_opened: 0,
        }
    }

    fn push_outcome(&mut self, failed: bool, window_size: usize) {
        if self.window.len() >= window_size {
            self.window.pop_front();
        }
        self.window.push_back(failed);
    }

    fn window_failures(&self) -> usize {
        self.window.iter().filter(|failed| **failed).count()
    }

    fn window_failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window_failures() as f64 / self.window.len() as f64
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trial_in_flight = false;
        self.epoch += 1;
        self.times_opened += 1;
    }

    fn admit_trial(&mut self) -> Admission {
        self.state = CircuitState::HalfOpen;
        self.trial_in_flight = true;
        self.half_open_trials += 1;
        self.epoch += 1;
        Admission {
            epoch: self.epoch,
            trial: true,
        }
    }

    /// Whether an outcome reported for `admission` may change state
    fn is_current(&self, admission: Admission) -> bool {
        admission.epoch == self.epoch
            && match self.state {
                CircuitState::Closed => !admission.trial,
                CircuitState::HalfOpen => admission.trial && self.trial_in_flight,
                CircuitState::Open => false,
            }
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.trial_in_flight = false;
        self.epoch += 1;
        self.consecutive_failures = 0;
        self.window.clear();
    }
}

/// A state change to log and publish once the state lock is released
#[derive(Debug)]
enum Transition {
    Opened {
        consecutive_failures: u32,
        failure_rate: f64,
    },
    HalfOpened,
    Closed,
    Rejected {
        retry_after: Option<Duration>,
    },
}

/// Core circuit breaker implementation
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    config: CircuitBreakerConfig,

    inner: Mutex<BreakerState>,

    clock: SharedClock,

    events: Option<EventPublisher>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        let name = name.into();
        debug!(
            component = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout_ms = config.reset_timeout_ms,
            rolling_window_size = config.rolling_window_size,
            "🛡️ Circuit breaker initialized"
        );

        let window_size = config.rolling_window_size.max(1);
        Self {
            name,
            config,
            inner: Mutex::new(BreakerState::new(window_size)),
            clock,
            events: None,
        }
    }

    /// Publish state transitions on the given publisher
    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Admit a call if the circuit allows one now
    ///
    /// An open circuit past its reset timeout moves to Half-Open and admits exactly
    /// one trial; the caller holding that admission must report the result with
    /// `record_success`, `record_failure` or `abandon_trial`.
    pub fn allow(&self) -> Option<Admission> {
        self.check().ok()
    }

    /// Like [`allow`](Self::allow), but explains a denial
    pub fn check(&self) -> Result<Admission, CircuitRejection> {
        let now = self.clock.now();
        let reset_timeout = to_chrono(self.config.reset_timeout());

        let (decision, transition) = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => (
                    Ok(Admission {
                        epoch: inner.epoch,
                        trial: false,
                    }),
                    None,
                ),
                CircuitState::Open => {
                    let reopen_at = inner.opened_at.unwrap_or(now) + reset_timeout;
                    if now >= reopen_at {
                        (Ok(inner.admit_trial()), Some(Transition::HalfOpened))
                    } else {
                        inner.rejected_count += 1;
                        let retry_after = Some(until(now, reopen_at));
                        (
                            Err(self.rejection(CircuitState::Open, retry_after)),
                            Some(Transition::Rejected { retry_after }),
                        )
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.trial_in_flight {
                        inner.rejected_count += 1;
                        (
                            Err(self.rejection(CircuitState::HalfOpen, None)),
                            Some(Transition::Rejected { retry_after: None }),
                        )
                    } else {
                        (Ok(inner.admit_trial()), None)
                    }
                }
            }
        };

        if let Some(transition) = transition {
            self.announce(transition);
        }
        decision
    }

    /// Record a successful call
    pub fn record_success(&self, admission: Admission) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.total_calls += 1;
            inner.success_count += 1;

            if !inner.is_current(admission) {
                debug!(component = %self.name, "Late success ignored for circuit state");
                return;
            }
            match inner.state {
                CircuitState::HalfOpen => {
                    inner.close();
                    Some(Transition::Closed)
                }
                CircuitState::Closed => {
                    inner.consecutive_failures = 0;
                    inner.push_outcome(false, self.config.rolling_window_size);
                    None
                }
                CircuitState::Open => None,
            }
        };

        debug!(component = %self.name, "🟢 Operation succeeded");
        if let Some(transition) = transition {
            self.announce(transition);
        }
    }

    /// Record a failed call
    pub fn record_failure(&self, admission: Admission) {
        let now = self.clock.now();
        let transition = {
            let mut inner = self.inner.lock();
            inner.total_calls += 1;
            inner.failure_count += 1;

            if !inner.is_current(admission) {
                debug!(component = %self.name, "Late failure ignored for circuit state");
                return;
            }
            match inner.state {
                CircuitState::HalfOpen => {
                    inner.open(now);
                    Some(Transition::Opened {
                        consecutive_failures: inner.consecutive_failures,
                        failure_rate: inner.window_failure_rate(),
                    })
                }
                CircuitState::Closed => {
                    inner.consecutive_failures += 1;
                    inner.push_outcome(true, self.config.rolling_window_size);

                    let window_full = inner.window.len() >= self.config.rolling_window_size;
                    let failure_rate = inner.window_failure_rate();
                    let rate_tripped =
                        window_full && failure_rate > self.config.failure_rate_threshold;

                    if inner.consecutive_failures >= self.config.failure_threshold || rate_tripped
                    {
                        inner.open(now);
                        Some(Transition::Opened {
                            consecutive_failures: inner.consecutive_failures,
                            failure_rate,
                        })
                    } else {
                        None
                    }
                }
                CircuitState::Open => None,
            }
        };

        debug!(component = %self.name, "🔴 Operation failed");
        if let Some(transition) = transition {
            self.announce(transition);
        }
    }

    /// Give back a half-open trial that ended without an outcome (e.g. cancelled)
    ///
    /// Admissions outside Half-Open carry no slot, so this is a no-op for them.
    pub fn abandon_trial(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.is_current(admission) {
            inner.trial_in_flight = false;
            debug!(component = %self.name, "Half-open trial abandoned");
        }
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// If the returned future is dropped before the operation resolves, a half-open
    /// trial it held is abandoned rather than leaked.
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.check()?;

        let mut guard = TrialGuard {
            breaker: self,
            admission,
            resolved: false,
        };
        let result = operation().await;
        guard.resolved = true;

        match &result {
            Ok(_) => self.record_success(admission),
            Err(_) => self.record_failure(admission),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Time until an open circuit admits its trial, `None` unless open
    pub fn retry_after(&self) -> Option<Duration> {
        let now = self.clock.now();
        let inner = self.inner.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(until(
                now,
                opened_at + to_chrono(self.config.reset_timeout()),
            )),
            _ => None,
        }
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced open");
        let now = self.clock.now();
        let transition = {
            let mut inner = self.inner.lock();
            inner.open(now);
            Transition::Opened {
                consecutive_failures: inner.consecutive_failures,
                failure_rate: inner.window_failure_rate(),
            }
        };
        self.announce(transition);
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced closed");
        self.inner.lock().close();
        self.announce(Transition::Closed);
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let retry_after_ms = self.retry_after().map(|d| d.as_millis() as u64);
        let inner = self.inner.lock();

        let success_rate = if inner.total_calls > 0 {
            inner.success_count as f64 / inner.total_calls as f64
        } else {
            0.0
        };

        CircuitBreakerMetrics {
            total_calls: inner.total_calls,
            success_count: inner.success_count,
            failure_count: inner.failure_count,
            consecutive_failures: inner.consecutive_failures,
            rejected_count: inner.rejected_count,
            half_open_trials: inner.half_open_trials,
            times_opened: inner.times_opened,
            window_failures: inner.window_failures(),
            window_len: inner.window.len(),
            current_state: inner.state,
            failure_rate: inner.window_failure_rate(),
            success_rate,
            opened_at: inner.opened_at,
            retry_after_ms,
        }
    }

    /// Check if circuit is healthy (closed state with low failure rate)
    pub fn is_healthy(&self) -> bool {
        self.metrics().is_healthy()
    }

    fn rejection(&self, state: CircuitState, retry_after: Option<Duration>) -> CircuitRejection {
        CircuitRejection {
            component: self.name.clone(),
            state,
            retry_after,
        }
    }

    fn announce(&self, transition: Transition) {
        let event = match transition {
            Transition::Opened {
                consecutive_failures,
                failure_rate,
            } => {
                error!(
                    component = %self.name,
                    consecutive_failures = consecutive_failures,
                    failure_rate = failure_rate,
                    failure_threshold = self.config.failure_threshold,
                    reset_timeout_ms = self.config.reset_timeout_ms,
                    "🔴 Circuit breaker opened (failing fast)"
                );
                CoordinationEvent::CircuitOpened {
                    name: self.name.clone(),
                    consecutive_failures,
                    failure_rate,
                }
            }
            Transition::HalfOpened => {
                info!(component = %self.name, "🟡 Circuit breaker half-open (testing recovery)");
                CoordinationEvent::CircuitHalfOpened {
                    name: self.name.clone(),
                }
            }
            Transition::Closed => {
                info!(component = %self.name, "🟢 Circuit breaker closed (recovered)");
                CoordinationEvent::CircuitClosed {
                    name: self.name.clone(),
                }
            }
            Transition::Rejected { retry_after } => {
                info!(
                    component = %self.name,
                    retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
                    "Circuit breaker rejected call"
                );
                CoordinationEvent::CircuitRejected {
                    name: self.name.clone(),
                    retry_after_ms: retry_after.map(|d| d.as_millis() as u64).unwrap_or(0),
                }
            }
        };

        if let Some(events) = &self.events {
            events.publish_event(event);
        }
    }
}

struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    resolved: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.abandon_trial(self.admission);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn breaker(threshold: u32, reset_ms: u64) -> (Arc<ManualClock>, CircuitBreaker) {
        let clock = Arc::new(ManualClock::new());
        let config = CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout_ms: reset_ms,
            rolling_window_size: 10,
            failure_rate_threshold: 1.0,
        };
        let circuit = CircuitBreaker::new("test", config, clock.clone());
        (clock, circuit)
    }

    fn fail(circuit: &CircuitBreaker) {
        circuit.record_failure(circuit.check().unwrap());
    }

    fn succeed(circuit: &CircuitBreaker) {
        circuit.record_success(circuit.check().unwrap());
    }

    #[tokio::test]
    async fn test_circuit_breaker_normal_operation() {
        let (_clock, circuit) = breaker(3, 100);

        assert_eq!(circuit.state(), CircuitState::Closed);

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());

        let metrics = circuit.metrics();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 0);
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_on_failures() {
        let (_clock, circuit) = breaker(2, 100);

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Closed);

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        let result = circuit
            .call(|| async { Ok::<_, String>("should not execute") })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen { .. })));
        assert_eq!(circuit.metrics().rejected_count, 1);
    }

    #[test]
    fn test_threshold_three_transitions() {
        let (clock, circuit) = breaker(3, 1000);

        for _ in 0..3 {
            fail(&circuit);
        }
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(circuit.allow().is_none());

        clock.advance(Duration::from_millis(1000));
        let trial = circuit.allow().unwrap();
        assert!(trial.is_trial());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        assert!(circuit.allow().is_none(), "only one trial may be in flight");

        circuit.record_success(trial);
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.metrics().consecutive_failures, 0);
    }

    #[test]
    fn test_half_open_failure_reopens_with_fresh_timestamp() {
        let (clock, circuit) = breaker(1, 500);

        fail(&circuit);
        let first_open = circuit.metrics().opened_at.unwrap();

        clock.advance(Duration::from_millis(600));
        let trial = circuit.allow().unwrap();
        circuit.record_failure(trial);

        let metrics = circuit.metrics();
        assert_eq!(metrics.current_state, CircuitState::Open);
        assert!(metrics.opened_at.unwrap() > first_open);
        assert_eq!(metrics.times_opened, 2);
        assert_eq!(circuit.retry_after(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let (_clock, circuit) = breaker(3, 1000);

        fail(&circuit);
        fail(&circuit);
        succeed(&circuit);
        fail(&circuit);

        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.metrics().consecutive_failures, 1);
    }

    #[test]
    fn test_failure_rate_opens_full_window() {
        let clock = Arc::new(ManualClock::new());
        let config = CircuitBreakerConfig {
            failure_threshold: 100,
            reset_timeout_ms: 1000,
            rolling_window_size: 4,
            failure_rate_threshold: 0.5,
        };
        let circuit = CircuitBreaker::new("rate", config, clock);

        fail(&circuit);
        succeed(&circuit);
        fail(&circuit);
        assert_eq!(circuit.state(), CircuitState::Closed, "window not yet full");

        fail(&circuit);
        assert_eq!(circuit.state(), CircuitState::Open);
    }

    #[test]
    fn test_abandoned_trial_frees_slot() {
        let (clock, circuit) = breaker(1, 100);

        fail(&circuit);
        clock.advance(Duration::from_millis(100));
        let trial = circuit.allow().unwrap();
        assert!(circuit.allow().is_none());

        circuit.abandon_trial(trial);
        assert!(circuit.allow().is_some());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_late_outcomes_do_not_resolve_the_trial() {
        let (clock, circuit) = breaker(1, 100);
        let early = circuit.allow().unwrap();
        let abandoned_early = circuit.allow().unwrap();

        fail(&circuit);
        clock.advance(Duration::from_millis(100));
        let trial = circuit.allow().unwrap();

        circuit.record_success(early);
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        circuit.abandon_trial(abandoned_early);
        assert!(circuit.allow().is_none());

        circuit.record_failure(trial);
        assert_eq!(circuit.state(), CircuitState::Open);
    }

    #[test]
    fn test_stale_trial_cannot_close_reopened_circuit() {
        let (clock, circuit) = breaker(1, 100);
        fail(&circuit);
        clock.advance(Duration::from_millis(100));
        let first_trial = circuit.allow().unwrap();
        circuit.abandon_trial(first_trial);
        let second_trial = circuit.allow().unwrap();

        circuit.record_success(first_trial);
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        circuit.record_success(second_trial);
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[test]
    fn test_concurrent_trial_is_exclusive() {
        let (clock, circuit) = breaker(1, 100);
        let circuit = Arc::new(circuit);
        fail(&circuit);
        clock.advance(Duration::from_millis(100));

        let admitted: usize = (0..8)
            .map(|_| {
                let circuit = circuit.clone();
                std::thread::spawn(move || circuit.allow().is_some())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap() as usize)
            .sum();

        assert_eq!(admitted, 1);
    }

    #[test]
    fn test_force_operations() {
        let (_clock, circuit) = breaker(3, 1000);

        circuit.force_open();
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(!circuit.is_healthy());

        circuit.force_closed();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert!(circuit.is_healthy());
    }

    #[tokio::test]
    async fn test_events_published_on_transitions() {
        let clock = Arc::new(ManualClock::new());
        let events = EventPublisher::new(16);
        let mut receiver = events.subscribe();
        let circuit = CircuitBreaker::new(
            "evented",
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
            clock,
        )
        .with_events(events);

        fail(&circuit);
        assert!(circuit.allow().is_none());

        assert_eq!(receiver.recv().await.unwrap().name, "circuit.opened");
        assert_eq!(receiver.recv().await.unwrap().name, "circuit.rejected");
    }
}
