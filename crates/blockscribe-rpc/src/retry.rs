//! Exponential backoff for transient transport failures.

use std::time::Duration;

/// How often and how patiently an HTTP request is retried.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// Upper bound for any single pause.
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Maps a retry attempt to its backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay before the `attempt`-th retry (1-based), or `None`
    /// once `attempt` exceeds `max_retries`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        let cfg = &self.config;
        if attempt == 0 || attempt > cfg.max_retries {
            return None;
        }
        let factor = cfg.multiplier.powi(attempt as i32 - 1);
        let ms = (cfg.initial_backoff.as_millis() as f64 * factor).min(cfg.max_backoff.as_millis() as f64);
        Some(Duration::from_millis(ms as u64))
    }
}
