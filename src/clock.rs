//! # Time Sources
//!
//! Every lease, deadline and breaker cooldown in the coordinator is evaluated against a
//! [`Clock`]. Production code uses [`SystemClock`], which is anchored to
//! `tokio::time::Instant` so that it never moves backwards and so that tests running
//! with a paused tokio runtime see the same virtual time as `tokio::time::sleep`.
//! [`ManualClock`] is advanced explicitly and is used by deterministic unit tests.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Supplies "now" for lease and timeout comparisons
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Shared clock handle passed between components
pub type SharedClock = Arc<dyn Clock>;

/// Monotonic wall-clock approximation: a UTC anchor plus elapsed monotonic time
#[derive(Debug, Clone)]
pub struct SystemClock {
    anchor_wall: DateTime<Utc>,
    anchor: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            anchor_wall: Utc::now(),
            anchor: Instant::now(),
        }
    }

    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        self.anchor_wall + to_chrono(self.anchor.elapsed())
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += to_chrono(by);
    }

    /// Jump to an absolute instant (may not go backwards)
    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock();
        if to > *now {
            *now = to;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Convert a std duration into a chrono duration, saturating on overflow
pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Time remaining until `deadline`, zero if it has already passed
pub fn until(now: DateTime<Utc>, deadline: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.advance(Duration::from_millis(1500));

        assert_eq!(clock.now() - start, chrono::Duration::milliseconds(1500));
    }

    #[test]
    fn test_manual_clock_never_goes_backwards() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.set(start - chrono::Duration::seconds(10));

        assert_eq!(clock.now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_clock_follows_tokio_time() {
        let clock = SystemClock::new();
        let before = clock.now();

        tokio::time::advance(Duration::from_secs(5)).await;

        let elapsed = clock.now() - before;
        assert!(elapsed >= chrono::Duration::seconds(5));
    }

    #[test]
    fn test_until_saturates_at_zero() {
        let now = Utc::now();
        assert_eq!(until(now, now - chrono::Duration::seconds(1)), Duration::ZERO);
        assert_eq!(
            until(now, now + chrono::Duration::milliseconds(250)),
            Duration::from_millis(250)
        );
    }
}
