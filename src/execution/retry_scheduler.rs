//! # Retry Scheduler
//!
//! ## Architecture: One Attempt at a Time
//!
//! Drives a single task to a terminal status. Each iteration asks the task's circuit
//! breaker for permission, runs the body on its own tokio task under a hard deadline,
//! reports the outcome to the breaker, and either finishes the task or backs off before
//! the next attempt.
//!
//! ## Key Features
//!
//! - **Attempt deadlines**: at `per_attempt_timeout` the body's token is cancelled and
//!   its tokio task aborted, so a stuck body never holds the task past its deadline
//! - **Circuit-open waits**: a denied attempt does not consume a retry; the scheduler
//!   waits for the breaker's remaining open time and gives up after
//!   `max_circuit_open_waits` consecutive denials
//! - **Cancellable suspension**: backoff sleeps and attempts both stop on cancellation
//! - **Fencing**: the task's lock fence (and leader generation) is re-validated before
//!   every attempt
//!
//! Attempts within a task are strictly sequential; no retries happen beyond
//! `max_retries`.

use super::backoff::BackoffConfig;
use super::cancellation::TaskCancellation;
use super::task::{FencingGuard, SharedTaskBody, TaskContext};
use crate::clock::{to_chrono, SharedClock};
use crate::constants::system::MAX_RETRY_LIMIT;
use crate::events::{CoordinationEvent, EventPublisher};
use crate::models::SharedTaskRecord;
use crate::resilience::CircuitBreaker;
use crate::state_machine::{AttemptStatus, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Execution limits applied to submitted tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub per_attempt_timeout_ms: u64,
    pub max_retries: u32,
    /// Consecutive circuit-open denials tolerated before a task fails
    pub max_circuit_open_waits: u32,
    pub max_concurrent_tasks: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            per_attempt_timeout_ms: 30_000,
            max_retries: 3,
            max_circuit_open_waits: 3,
            max_concurrent_tasks: 100,
        }
    }
}

impl ExecutionConfig {
    pub fn per_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.per_attempt_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.per_attempt_timeout_ms == 0 {
            return Err("execution.per_attempt_timeout_ms must be greater than 0".to_string());
        }
        if self.max_retries > MAX_RETRY_LIMIT {
            return Err(format!(
                "execution.max_retries must be at most {MAX_RETRY_LIMIT}"
            ));
        }
        if self.max_concurrent_tasks == 0 {
            return Err("execution.max_concurrent_tasks must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Limits for one task run
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub per_attempt_timeout: Duration,
    pub max_circuit_open_waits: u32,
    pub backoff: BackoffConfig,
}

impl RetryPolicy {
    pub fn from_config(execution: &ExecutionConfig, backoff: &BackoffConfig) -> Self {
        Self {
            max_retries: execution.max_retries,
            per_attempt_timeout: execution.per_attempt_timeout(),
            max_circuit_open_waits: execution.max_circuit_open_waits,
            backoff: backoff.clone(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// How a single attempt ended
#[derive(Debug)]
enum AttemptOutcome {
    Succeeded(Value),
    Failed(String),
    TimedOut,
    Cancelled(String),
}

/// Runs task attempts with backoff, deadlines and circuit breaking
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    clock: SharedClock,
    events: Option<EventPublisher>,
}

impl RetryScheduler {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    /// Drive `record` to a terminal status and return it
    #[instrument(skip_all, fields(task_key = %record.read().key, operation = %breaker.name()))]
    pub async fn run_task(
        &self,
        record: &SharedTaskRecord,
        body: SharedTaskBody,
        payload: Value,
        breaker: &CircuitBreaker,
        policy: &RetryPolicy,
        cancellation: &TaskCancellation,
        fencing: Option<FencingGuard>,
    ) -> TaskStatus {
        let task_key = record.read().key.clone();
        let max_attempts = policy.max_attempts();
        let mut circuit_waits: u32 = 0;

        loop {
            if let Some(reason) = cancellation.reason() {
                return self.complete_task(record, TaskStatus::Cancelled, Some(reason));
            }

            let admission = match breaker.check() {
                Ok(admission) => admission,
                Err(rejection) => {
                    circuit_waits += 1;
                    if circuit_waits > policy.max_circuit_open_waits {
                        warn!(
                            task_key = %task_key,
                            circuit_waits = circuit_waits - 1,
                            "Circuit never admitted the task, giving up"
                        );
                        let reason = format!("circuit breaker '{}' open", rejection.component);
                        return self.complete_task(record, TaskStatus::Failed, Some(reason));
                    }

                    let delay = rejection
                        .retry_after
                        .filter(|wait| !wait.is_zero())
                        .unwrap_or_else(|| policy.backoff.base_delay());
                    let next_attempt = self.prepare_retry(record);
                    info!(
                        task_key = %task_key,
                        circuit_state = %rejection.state,
                        delay_ms = delay.as_millis() as u64,
                        "Circuit open, waiting before attempt"
                    );
                    self.publish(CoordinationEvent::RetryScheduled {
                        task_key: task_key.clone(),
                        next_attempt,
                        delay_ms: delay.as_millis() as u64,
                        reason: format!("circuit breaker '{}' {}", rejection.component, rejection.state),
                    });
                    self.pause(delay, cancellation).await;
                    continue;
                }
            };
            circuit_waits = 0;

            if let Some(guard) = &fencing {
                if let Err(e) = guard.validate() {
                    breaker.abandon_trial(admission);
                    warn!(task_key = %task_key, error = %e, "Fencing check failed before attempt");
                    return self.complete_task(
                        record,
                        TaskStatus::Cancelled,
                        Some(format!("lock ownership lost: {e}")),
                    );
                }
            }

            let started_at = self.clock.now();
            let deadline = started_at + to_chrono(policy.per_attempt_timeout);
            let begun = record.write().begin_attempt(started_at, deadline);
            let attempt = match begun {
                Ok(attempt) => attempt,
                Err(e) => {
                    breaker.abandon_trial(admission);
                    error!(task_key = %task_key, error = %e, "Could not start attempt");
                    return record.read().status;
                }
            };

            debug!(task_key = %task_key, attempt, max_attempts, "▶️ Attempt started");
            self.publish(CoordinationEvent::AttemptStarted {
                task_key: task_key.clone(),
                attempt,
                deadline,
            });

            let ctx = TaskContext {
                task_key: task_key.clone(),
                attempt,
                max_attempts,
                deadline,
                payload: payload.clone(),
                cancellation: cancellation.token().child_token(),
                fencing: fencing.clone(),
            };
            let outcome = self
                .run_attempt(body.clone(), ctx, policy.per_attempt_timeout, cancellation)
                .await;
            let finished_at = self.clock.now();

            match outcome {
                AttemptOutcome::Succeeded(output) => {
                    breaker.record_success(admission);
                    let duration_ms = {
                        let mut record = record.write();
                        record.finish_attempt(AttemptStatus::Succeeded, None, finished_at);
                        record.output = Some(output);
                        record
                            .current_attempt()
                            .and_then(|a| a.duration_ms())
                            .unwrap_or_default()
                    };
                    self.publish(CoordinationEvent::AttemptSucceeded {
                        task_key: task_key.clone(),
                        attempt,
                        duration_ms,
                    });
                    return self.complete_task(record, TaskStatus::Succeeded, None);
                }
                AttemptOutcome::Failed(message) => {
                    breaker.record_failure(admission);
                    warn!(task_key = %task_key, attempt, error = %message, "Attempt failed");
                    record.write().finish_attempt(
                        AttemptStatus::Failed,
                        Some(message.clone()),
                        finished_at,
                    );
                    self.publish(CoordinationEvent::AttemptFailed {
                        task_key: task_key.clone(),
                        attempt,
                        error: message,
                    });
                }
                AttemptOutcome::TimedOut => {
                    breaker.record_failure(admission);
                    let timeout_ms = policy.per_attempt_timeout.as_millis() as u64;
                    let message = format!("attempt {attempt} timed out after {timeout_ms}ms");
                    warn!(task_key = %task_key, attempt, timeout_ms, "⏰ Attempt timed out");
                    record
                        .write()
                        .finish_attempt(AttemptStatus::TimedOut, Some(message), finished_at);
                    self.publish(CoordinationEvent::AttemptTimedOut {
                        task_key: task_key.clone(),
                        attempt,
                        timeout_ms,
                    });
                }
                AttemptOutcome::Cancelled(reason) => {
                    breaker.abandon_trial(admission);
                    record.write().finish_attempt(
                        AttemptStatus::Cancelled,
                        Some(reason.clone()),
                        finished_at,
                    );
                    self.publish(CoordinationEvent::AttemptCancelled {
                        task_key: task_key.clone(),
                        attempt,
                        reason: reason.clone(),
                    });
                    return self.complete_task(record, TaskStatus::Cancelled, Some(reason));
                }
            }

            if attempt >= max_attempts {
                let last_error = record.read().last_error.clone();
                return self.complete_task(record, TaskStatus::Failed, last_error);
            }

            let delay = policy.backoff.delay_for(attempt);
            let next_attempt = self.prepare_retry(record);
            info!(
                task_key = %task_key,
                next_attempt,
                delay_ms = delay.as_millis() as u64,
                "🔄 Retry scheduled"
            );
            self.publish(CoordinationEvent::RetryScheduled {
                task_key: task_key.clone(),
                next_attempt,
                delay_ms: delay.as_millis() as u64,
                reason: "attempt failed".to_string(),
            });
            self.pause(delay, cancellation).await;
        }
    }

    /// Move a task to a terminal status, log it and publish `task.completed`
    ///
    /// Returns the record's status afterwards; a record that was already terminal is
    /// left as it was.
    pub fn complete_task(
        &self,
        record: &SharedTaskRecord,
        status: TaskStatus,
        error: Option<String>,
    ) -> TaskStatus {
        let now = self.clock.now();
        let (task_key, attempts, last_error) = {
            let mut record = record.write();
            if let Err(e) = record.complete(status, error, now) {
                debug!(task_key = %record.key, error = %e, "Task already finished");
                return record.status;
            }
            (
                record.key.clone(),
                record.attempt_count(),
                record.last_error.clone(),
            )
        };

        match status {
            TaskStatus::Succeeded => info!(task_key = %task_key, attempts, "✅ Task succeeded"),
            TaskStatus::Cancelled => info!(
                task_key = %task_key,
                attempts,
                reason = last_error.as_deref().unwrap_or("cancelled"),
                "🛑 Task cancelled"
            ),
            _ => error!(
                task_key = %task_key,
                attempts,
                last_error = last_error.as_deref().unwrap_or_default(),
                "❌ Task failed"
            ),
        }

        self.publish(CoordinationEvent::TaskCompleted {
            task_key,
            status,
            attempts,
            last_error,
        });
        status
    }

    async fn run_attempt(
        &self,
        body: SharedTaskBody,
        ctx: TaskContext,
        limit: Duration,
        cancellation: &TaskCancellation,
    ) -> AttemptOutcome {
        let attempt_token = ctx.cancellation.clone();
        let mut handle = tokio::spawn(async move { body.execute(ctx).await });

        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => AttemptOutcome::Cancelled(
                cancellation.reason().unwrap_or_else(|| "cancelled".to_string()),
            ),
            joined = tokio::time::timeout(limit, &mut handle) => match joined {
                Ok(Ok(Ok(output))) => AttemptOutcome::Succeeded(output),
                Ok(Ok(Err(e))) => AttemptOutcome::Failed(format!("{e:#}")),
                Ok(Err(join_error)) if join_error.is_panic() => {
                    AttemptOutcome::Failed("task body panicked".to_string())
                }
                Ok(Err(join_error)) => AttemptOutcome::Failed(join_error.to_string()),
                Err(_) => AttemptOutcome::TimedOut,
            },
        };

        if matches!(
            outcome,
            AttemptOutcome::TimedOut | AttemptOutcome::Cancelled(_)
        ) {
            attempt_token.cancel();
            handle.abort();
        }
        outcome
    }

    /// Mark the task as between attempts; returns the number of the next attempt
    fn prepare_retry(&self, record: &SharedTaskRecord) -> u32 {
        let mut record = record.write();
        if let Err(e) = record.transition(TaskStatus::Retrying) {
            debug!(task_key = %record.key, error = %e, "Task not moved to retrying");
        }
        record.attempt_count() + 1
    }

    async fn pause(&self, delay: Duration, cancellation: &TaskCancellation) {
        tokio::select! {
            _ = cancellation.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    fn publish(&self, event: CoordinationEvent) {
        if let Some(events) = &self.events {
            events.publish_event(event);
        }
    }
}
