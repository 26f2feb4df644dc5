//! Restart policies for supervised loops.
//!
//! A supervised loop (the HTTP listener, for instance) reruns its body after
//! every exit. [`RestartPolicy::Immediate`] reruns it right away; a
//! [`RestartPolicy::Backoff`] waits according to a [`RetryPolicy`], growing
//! the delay with every consecutive failure and resetting it after a clean
//! run.
//!
//! # Example
//!
//! ```rust
//! use user_service_runtime::retry::{RestartPolicy, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RestartPolicy::Backoff(
//!     RetryPolicy::builder()
//!         .initial_delay(Duration::from_millis(100))
//!         .max_delay(Duration::from_secs(10))
//!         .multiplier(2.0)
//!         .build(),
//! );
//!
//! assert_eq!(policy.delay_after(0), None);
//! assert_eq!(policy.delay_after(1), Some(Duration::from_millis(100)));
//! assert_eq!(policy.delay_after(3), Some(Duration::from_millis(400)));
//! ```

use rand::Rng;
use std::time::Duration;

/// Exponential backoff configuration.
///
/// # Default Values
///
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `jitter`: off
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Add up to 50% random extra delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            initial_delay: None,
            max_delay: None,
            multiplier: None,
            jitter: false,
        }
    }

    /// Calculate delay for a given attempt number.
    ///
    /// Uses exponential backoff: delay = initial_delay * (multiplier ^ attempt)
    /// Capped at `max_delay` (before jitter).
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay.as_millis() as f64
            * self.multiplier.powi(attempt.min(64) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64) as u64;

        let jitter_ms = if self.jitter && capped_ms > 1 {
            rand::thread_rng().gen_range(0..=capped_ms / 2)
        } else {
            0
        };

        Duration::from_millis(capped_ms + jitter_ms)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    jitter: bool,
}

impl RetryPolicyBuilder {
    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Enable random jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            initial_delay: self.initial_delay.unwrap_or(defaults.initial_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
            jitter: self.jitter,
        }
    }
}

/// What a supervised loop does between two runs of its body.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RestartPolicy {
    /// Rerun immediately, whatever the previous run returned
    #[default]
    Immediate,
    /// Wait before rerunning after a failed run
    Backoff(RetryPolicy),
}

impl RestartPolicy {
    /// Delay to apply after `consecutive_failures` failed runs in a row.
    ///
    /// Returns `None` when the loop should rerun immediately: always for
    /// [`RestartPolicy::Immediate`], and after a clean run (zero failures)
    /// for [`RestartPolicy::Backoff`].
    #[must_use]
    pub fn delay_after(&self, consecutive_failures: u32) -> Option<Duration> {
        match self {
            Self::Immediate => None,
            Self::Backoff(_) if consecutive_failures == 0 => None,
            Self::Backoff(policy) => Some(policy.delay_for_attempt(consecutive_failures - 1)),
        }
    }
}
