#![allow(dead_code)] // Each test binary uses a different subset of the helpers

pub mod builders;
pub mod strategies;

pub use builders::*;

use tasker_coordinator::events::PublishedEvent;
use tokio::sync::broadcast;

/// Names of every event currently buffered on a subscription
pub fn drain_event_names(receiver: &mut broadcast::Receiver<PublishedEvent>) -> Vec<String> {
    let mut names = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        names.push(event.name);
    }
    names
}

/// Unique key per test so shared state never collides
pub fn unique_key(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}
