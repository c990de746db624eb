//! Retry policy and HTTP status classification.
//!
//! The delay computation is pure: callers pass the jitter sample in, so
//! the schedule is reproducible in tests and the randomness lives with
//! the dispatcher.

use std::time::Duration;

/// Exponential backoff with multiplicative jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `1` disables retries.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Fraction in `[0, 1]`; a delay varies by up to `± jitter × delay`.
    pub jitter: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: 0.2,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after attempt `attempt` (1-based) has failed.
    ///
    /// `jitter_sample` is a uniform sample in `[0, 1)`; `0.5` yields the
    /// un-jittered delay.
    pub fn delay_for_attempt(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let sample = jitter_sample.clamp(0.0, 1.0);
        let factor = 1.0 + (sample * 2.0 - 1.0) * self.jitter.clamp(0.0, 1.0);
        let delay = (base * factor).max(0.0);
        if !delay.is_finite() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// What to do after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then make attempt number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// The cap is reached; `attempts` were made in total.
    Exhausted { attempts: u32 },
}

/// Attempt counter for one logical request.
#[derive(Debug, Clone)]
pub struct Attempts {
    policy: RetryPolicy,
    made: u32,
}

impl Attempts {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, made: 0 }
    }

    /// Record the start of an attempt and return its 1-based number.
    pub fn begin(&mut self) -> u32 {
        self.made += 1;
        self.made
    }

    pub fn made(&self) -> u32 {
        self.made
    }

    /// Decide whether the attempt that just failed is retried.
    pub fn after_failure(&self, jitter_sample: f64) -> RetryDecision {
        if self.made >= self.policy.max_attempts.max(1) {
            RetryDecision::Exhausted {
                attempts: self.made,
            }
        } else {
            RetryDecision::Retry {
                attempt: self.made + 1,
                delay: self.policy.delay_for_attempt(self.made, jitter_sample),
            }
        }
    }
}

/// How the dispatcher treats an upstream status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// 400: the query itself is malformed. Never retried.
    BadRequest,
    NotFound,
    /// 5xx, 408 and 429. Retried.
    Transient,
    /// Any other 4xx (or unexpected code). Never retried.
    Rejected,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        400 => StatusClass::BadRequest,
        404 => StatusClass::NotFound,
        408 | 429 => StatusClass::Transient,
        500..=599 => StatusClass::Transient,
        _ => StatusClass::Rejected,
    }
}
