use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RetryError {
    #[error("Invalid retry configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    ExponentialBackoff,
    LinearBackoff,
    FixedDelay,
}

/// Failure handling for one batch.
///
/// `max_attempts` counts the first attempt, so `1` drops a batch as soon as
/// its delivery fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(with = "crate::app::config::serde_helpers")]
    pub base_delay: Duration,
    #[serde(with = "crate::app::config::serde_helpers")]
    pub max_delay: Duration,
    pub strategy: RetryStrategy,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: RetryStrategy::ExponentialBackoff,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Drop every failed batch without retrying.
    pub fn drop_on_failure() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), RetryError> {
        if self.max_attempts == 0 {
            return Err(RetryError::InvalidConfig(
                "max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(RetryError::InvalidConfig(format!(
                "base_delay ({:?}) exceeds max_delay ({:?})",
                self.base_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RetryManager {
    config: RetryConfig,
}

impl RetryManager {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// `attempts` is the number of attempts already made for the batch.
    pub fn should_give_up(&self, attempts: u32) -> bool {
        attempts >= self.config.max_attempts
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_millis = self.config.base_delay.as_millis() as u64;
        let base_delay = match self.config.strategy {
            RetryStrategy::ExponentialBackoff => {
                let multiplier = 2_u64.saturating_pow(attempt);
                Duration::from_millis(base_millis.saturating_mul(multiplier))
            }
            RetryStrategy::LinearBackoff => {
                Duration::from_millis(base_millis.saturating_mul(attempt as u64 + 1))
            }
            RetryStrategy::FixedDelay => self.config.base_delay,
        };

        let capped_delay = std::cmp::min(base_delay, self.config.max_delay);

        if self.config.jitter {
            Self::apply_jitter(capped_delay)
        } else {
            capped_delay
        }
    }

    fn apply_jitter(delay: Duration) -> Duration {
        let mut rng = rand::rng();
        let jitter_factor = rng.random_range(0.5..1.5); // ±50% jitter
        Duration::from_millis((delay.as_millis() as f64 * jitter_factor) as u64)
    }
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
