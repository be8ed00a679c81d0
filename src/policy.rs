use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What happens when a question is answered more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AnswerPolicy {
    /// The latest take replaces the earlier one.
    #[default]
    Overwrite,
    /// Takes are concatenated and their durations summed.
    Append,
}

/// What happens to the debited prep when the interview screen is left
/// before the session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AbandonPolicy {
    /// The prep stays spent; the session is recorded as abandoned.
    #[default]
    Forfeit,
    /// The prep is returned to the balance; the session is recorded as abandoned.
    Refund,
}

/// Capped exponential backoff with jitter for persistence retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self.initial.saturating_mul(1u32 << exp).min(self.max);
        if base.is_zero() {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0.0..0.2);
        base.mul_f64(1.0 - jitter)
    }
}
