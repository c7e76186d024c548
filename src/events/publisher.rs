use super::types::CoordinationEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Event publisher for coordination lifecycle events
///
/// Publishing never blocks and never fails for lack of subscribers, so it is safe to
/// call from inside lock and breaker critical sections once their guards are dropped.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
    published: Arc<AtomicU64>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventPublisherConfig {
    /// Broadcast channel capacity; slow subscribers lag past this many events
    pub capacity: usize,
}

impl Default for EventPublisherConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

impl EventPublisherConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("events.capacity must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPublisherStats {
    pub published_total: u64,
    pub subscriber_count: usize,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_config(config: &EventPublisherConfig) -> Self {
        Self::new(config.capacity)
    }

    /// Publish an event with the given name and context
    ///
    /// Returns how many subscribers received it. No subscribers is not an error:
    /// dashboards attach and detach freely.
    pub fn publish(&self, event_name: impl Into<String>, context: Value) -> usize {
        let event = PublishedEvent {
            name: event_name.into(),
            context,
            published_at: chrono::Utc::now(),
        };
        self.published.fetch_add(1, Ordering::Relaxed);
        self.sender.send(event).unwrap_or(0)
    }

    /// Publish a typed coordination event
    pub fn publish_event(&self, event: CoordinationEvent) {
        let name = event.name();
        let delivered = self.publish(name, event.context());
        tracing::trace!(event = name, delivered, "Coordination event published");
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> EventPublisherStats {
        EventPublisherStats {
            published_total: self.published.load(Ordering::Relaxed),
            subscriber_count: self.subscriber_count(),
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::from_config(&EventPublisherConfig::default())
    }
}
