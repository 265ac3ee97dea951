//! Exponential backoff for reconnecting the notification channel

use std::time::Duration;

use rand::Rng;

/// Exponential backoff configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first reconnect, in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential growth
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000, // 30 seconds
            multiplier: 2.0,
            jitter_factor: 0.1, // 10% jitter
        }
    }
}

/// Exponential backoff calculator with jitter.
///
/// The first delay is `initial_delay_ms`; each following one is multiplied
/// by `multiplier` up to `max_delay_ms`. Jitter is applied to the returned
/// delay only, so it never compounds.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    base_delay_ms: f64,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        let initial = config.initial_delay_ms as f64;
        Self {
            config,
            base_delay_ms: initial,
            attempt: 0,
        }
    }

    /// Get the next delay duration
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let max = self.config.max_delay_ms as f64;
        let capped_delay = self.base_delay_ms.min(max);

        // Apply jitter only if jitter_factor > 0
        let jitter_range = capped_delay * self.config.jitter_factor.clamp(0.0, 1.0);
        let final_delay = if jitter_range > 0.0 {
            let jitter = rand::rng().random_range(-jitter_range..jitter_range);
            (capped_delay + jitter).max(1.0)
        } else {
            capped_delay.max(1.0)
        };

        self.base_delay_ms = (self.base_delay_ms * self.config.multiplier.max(1.0)).min(max);

        Duration::from_millis(final_delay as u64)
    }

    /// Reset the backoff to initial state
    pub fn reset(&mut self) {
        self.base_delay_ms = self.config.initial_delay_ms as f64;
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(initial_delay_ms: u64, max_delay_ms: u64, multiplier: f64) -> BackoffConfig {
        BackoffConfig {
            initial_delay_ms,
            max_delay_ms,
            multiplier,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_first_delay_is_initial() {
        let mut backoff = ExponentialBackoff::with_config(no_jitter(1000, 30_000, 2.0));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(4000));
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn test_exponential_backoff_caps_at_max() {
        let mut backoff = ExponentialBackoff::with_config(no_jitter(1000, 5000, 10.0));

        for _ in 0..5 {
            backoff.next_delay();
        }

        assert_eq!(backoff.next_delay(), Duration::from_millis(5000));
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = ExponentialBackoff::with_config(no_jitter(100, 10_000, 2.0));

        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_within_range() {
        let config = BackoffConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 1000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        };
        let mut backoff = ExponentialBackoff::with_config(config);

        for _ in 0..50 {
            let delay = backoff.next_delay().as_millis();
            assert!((900..=1100).contains(&delay), "delay {delay} out of range");
        }
    }
}
