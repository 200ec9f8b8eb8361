use rand::Rng;
use std::time::Duration;

/// Exponential backoff: `base * 2^attempt`, capped, with optional ±25% jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        let delay = self.base.saturating_mul(factor).min(self.max);
        if self.jitter {
            let jitter_factor = rand::rng().random_range(0.75..=1.25);
            delay.mul_f64(jitter_factor).min(self.max)
        } else {
            delay
        }
    }
}
