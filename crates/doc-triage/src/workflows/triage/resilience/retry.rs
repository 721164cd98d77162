use std::time::Duration;

use rand::Rng;
use serde::Serialize;

/// Retry ceiling and backoff curve for one wrapped call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

/// `min(base * exponential_base^attempt, max)`, scaled into [0.5, 1.0] with jitter.
pub fn backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let raw = config.base_delay.as_secs_f64() * config.exponential_base.powi(exponent);
    let capped = if raw.is_finite() {
        raw.min(config.max_delay.as_secs_f64())
    } else {
        config.max_delay.as_secs_f64()
    };

    let scaled = if config.jitter {
        capped * rand::thread_rng().gen_range(0.5..=1.0)
    } else {
        capped
    };

    Duration::from_secs_f64(scaled.max(0.0))
}
