//! # Task Execution
//!
//! Task bodies, per-task cancellation, exponential backoff and the retry scheduler
//! that drives a task through its attempts.

pub mod backoff;
pub mod cancellation;
pub mod retry_scheduler;
pub mod task;

pub use backoff::BackoffConfig;
pub use cancellation::TaskCancellation;
pub use retry_scheduler::{ExecutionConfig, RetryPolicy, RetryScheduler};
pub use task::{task_fn, FencingGuard, FnTaskBody, SharedTaskBody, TaskBody, TaskContext};
