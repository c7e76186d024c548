//! # Locking Module
//!
//! Fenced lease locks: the single lease primitive behind both task execution
//! exclusion and leader election.

pub mod lock_manager;
pub mod types;

pub use lock_manager::LockManager;
pub use types::{FenceToken, LockInfo, LockManagerConfig, LockStatistics};
