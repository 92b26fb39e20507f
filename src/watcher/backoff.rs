// Exponential backoff with jitter for ledger resubmissions

use std::time::Duration;

use crate::config::RetryConfig;

const BACKOFF_MULTIPLIER: f64 = 2.0;
const JITTER_FACTOR: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            initial_ms: config.initial_backoff_ms,
            max_ms: config.max_backoff_ms.max(config.initial_backoff_ms),
            attempt: 0,
        }
    }

    /// Delay before the next attempt. Grows per call, capped at the maximum.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.initial_ms as f64 * BACKOFF_MULTIPLIER.powi(self.attempt.min(32) as i32);
        let capped = base.min(self.max_ms as f64);
        self.attempt = self.attempt.saturating_add(1);

        let jitter_range = capped * JITTER_FACTOR;
        let jitter = (rand::random::<f64>() - 0.5) * jitter_range * 2.0;
        let delay = (capped + jitter).clamp(0.0, self.max_ms as f64);

        Duration::from_millis(delay as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
