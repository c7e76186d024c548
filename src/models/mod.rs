//! # Task Models
//!
//! In-memory records the coordinator keeps for every submitted task.

pub mod task_attempt;
pub mod task_record;
pub mod task_request;

// Re-export core models for easy access
pub use task_attempt::TaskAttempt;
pub use task_record::{SharedTaskRecord, TaskRecord, TaskScope};
pub use task_request::TaskRequest;
