//! Exponential backoff between automatic reconnect attempts.
//!
//! When the broker link drops and `auto_reconnect` is enabled, the connection
//! kernel keeps the link alive on its own. Each failed attempt waits a little
//! longer than the previous one:
//!
//! ```text
//! delay[n] = min(initial * multiplier^(n-1), max_delay)
//! ```
//!
//! The schedule resets as soon as the broker acknowledges a connection. A
//! relay is expected to outlive broker outages, so the attempt limit is
//! unbounded unless `reconnect.max_attempts` says otherwise.
//!
//! # Examples
//!
//! ```ignore
//! use std::time::Duration;
//! use eventbee_mqtt::Backoff;
//!
//! let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(8), 2.0);
//! assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(1));
//! assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(2));
//!
//! backoff.reset();
//! assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(1));
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::config::ReconnectConfig;

/// Raised once the configured attempt limit is used up.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackoffError {
    #[error("Maximum number of reconnect attempts exceeded: {0}")]
    AttemptsExhausted(u32),
}

/// Reconnect delay schedule.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    attempt: u32,

    /// `None` retries forever.
    max_attempts: Option<u32>,
}

impl Backoff {
    /// Creates an unbounded schedule.
    ///
    /// A multiplier below 1.0 is clamped to 1.0 so the delay never shrinks.
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let max = max.max(initial);
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max,
            multiplier: multiplier.max(1.0),
            attempt: 0,
            max_attempts: None,
        }
    }

    /// Builds the schedule described by the `[transport.reconnect]` section.
    ///
    /// `max_attempts = 0` keeps retrying forever.
    pub fn from_config(config: &ReconnectConfig) -> Self {
        let mut backoff = Self::new(
            Duration::from_secs(config.initial_delay),
            Duration::from_secs(config.max_delay),
            config.multiplier,
        );
        if config.max_attempts > 0 {
            backoff.set_max_attempts(config.max_attempts);
        }
        backoff
    }

    /// Caps the number of attempts before [`next_sleep`](Self::next_sleep) fails.
    pub fn set_max_attempts(&mut self, max: u32) {
        self.max_attempts = Some(max);
    }

    /// Restarts the schedule at the initial delay.
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    /// Returns the delay before the next attempt and advances the schedule.
    ///
    /// # Returns
    /// - `Ok(Duration)`: how long to wait before retrying
    /// - `Err(BackoffError)`: the attempt limit is exhausted
    pub fn next_sleep(&mut self) -> Result<Duration, BackoffError> {
        if let Some(limit) = self.max_attempts {
            if self.attempt >= limit {
                return Err(BackoffError::AttemptsExhausted(limit));
            }
        }
        self.attempt = self.attempt.saturating_add(1);

        let sleep = self.current_delay;
        let next = self.current_delay.as_secs_f64() * self.multiplier;
        self.current_delay = Duration::from_secs_f64(next).min(self.max_delay);

        Ok(sleep)
    }

    /// Attempts made since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}
