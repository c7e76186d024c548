// Task and attempt lifecycle states.
//
// Transitions are enforced by `TaskRecord::transition`; terminal states have no exits.

pub mod states;

pub use states::{AttemptStatus, TaskStatus};
