//! Retry policy for exchange calls.

use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use backoff::ExponentialBackoffBuilder;

/// How long to wait between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Same delay after every failed attempt
    Fixed(Duration),
    /// Delay doubles after every failed attempt, capped at `max`
    Exponential { initial: Duration, max: Duration },
}

/// Bounded retry behavior for transient exchange failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first one (at least 1)
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Retry without waiting between attempts.
    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, BackoffStrategy::Fixed(Duration::ZERO))
    }

    /// A fresh delay generator for one call.
    pub fn delays(&self) -> Box<dyn Backoff + Send> {
        match &self.backoff {
            BackoffStrategy::Fixed(delay) => Box::new(Constant::new(*delay)),
            BackoffStrategy::Exponential { initial, max } => Box::new(
                ExponentialBackoffBuilder::new()
                    .with_initial_interval(*initial)
                    .with_multiplier(2.0)
                    .with_max_interval(*max)
                    .with_randomization_factor(0.0)
                    .with_max_elapsed_time(None)
                    .build(),
            ),
        }
    }

    /// The waits a call goes through when every attempt fails.
    #[cfg(test)]
    pub fn schedule(&self) -> Vec<Duration> {
        let mut delays = self.delays();
        (1..self.max_attempts)
            .map(|_| delays.next_backoff().unwrap_or(Duration::ZERO))
            .collect()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            3,
            BackoffStrategy::Exponential {
                initial: Duration::from_millis(500),
                max: Duration::from_secs(8),
            },
        )
    }
}
