//! Exponential backoff between attempts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff configuration: `min(base * multiplier^(attempt-1) * (1 + jitter), max)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Upper bound of the random fraction added to each delay (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delay before the attempt following `attempt_number`, without jitter
    pub fn delay_ceiling(&self, attempt_number: u32) -> Duration {
        let exponent = attempt_number.saturating_sub(1).min(63) as i32;
        let factor = self.multiplier.powi(exponent);
        let millis = (self.base_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(millis as u64)
    }

    /// Delay before the attempt following `attempt_number`
    pub fn delay_for(&self, attempt_number: u32) -> Duration {
        let delay = self.delay_ceiling(attempt_number);

        let jittered_delay = if self.jitter_factor > 0.0 {
            let jitter = fastrand::f64() * self.jitter_factor;
            delay.mul_f64(1.0 + jitter)
        } else {
            delay
        };

        jittered_delay.min(self.max_delay())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay_ms == 0 {
            return Err("backoff.base_delay_ms must be greater than 0".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(format!(
                "backoff.max_delay_ms ({}) must be at least base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            ));
        }
        if self.multiplier < 1.0 {
            return Err("backoff.multiplier must be at least 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err("backoff.jitter_factor must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth_without_jitter() {
        let config = BackoffConfig {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            jitter_factor: 0.0,
        };

        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(400));
        assert_eq!(config.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(config.delay_for(200), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = BackoffConfig::default();
        for attempt in 1..8 {
            let ceiling = config.delay_ceiling(attempt);
            let delay = config.delay_for(attempt);
            assert!(delay >= ceiling.min(config.max_delay()));
            assert!(delay <= ceiling.mul_f64(1.1).min(config.max_delay()));
        }
    }

    #[test]
    fn test_validation() {
        assert!(BackoffConfig::default().validate().is_ok());
        assert!(BackoffConfig {
            max_delay_ms: 10,
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(BackoffConfig {
            jitter_factor: 1.5,
            ..Default::default()
        }
        .validate()
        .is_err());
    }
}
