//! Exponential backoff.

use std::time::Duration;

use serde::Deserialize;

/// Backoff parameters. `max_attempts` counts the first try; `None` means
/// retry forever (the mandatory-data tier).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    #[serde(with = "millis")]
    pub initial_backoff: Duration,
    #[serde(with = "millis")]
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(3),
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Retry until success or cancellation.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Stateless policy: computes the delay after a given failed attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn is_bounded(&self) -> bool {
        self.config.max_attempts.is_some()
    }

    /// Delay to wait after the `attempt`-th failure (1-based), or `None` if
    /// the attempt budget is spent.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.config.max_attempts {
            if attempt >= max {
                return None;
            }
        }
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let ms = self.config.initial_backoff.as_millis() as f64 * self.config.multiplier.powi(exp);
        let capped = ms.min(self.config.max_backoff.as_millis() as f64);
        Some(Duration::from_millis(capped as u64))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_backoff_doubles_then_stops() {
        let p = RetryPolicy::new(RetryConfig {
            max_attempts: Some(3),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        });
        assert_eq!(p.delay_after(1), Some(Duration::from_millis(100)));
        assert_eq!(p.delay_after(2), Some(Duration::from_millis(200)));
        assert_eq!(p.delay_after(3), None);
    }

    #[test]
    fn unbounded_backoff_is_capped() {
        let p = RetryPolicy::new(RetryConfig::unbounded());
        assert!(!p.is_bounded());
        assert_eq!(p.delay_after(1_000), Some(Duration::from_secs(30)));
    }

    #[test]
    fn config_from_yaml_millis() {
        let cfg: RetryConfig = serde_json::from_str(r#"{"max_attempts":5,"initial_backoff":50}"#).unwrap();
        assert_eq!(cfg.max_attempts, Some(5));
        assert_eq!(cfg.initial_backoff, Duration::from_millis(50));
        assert_eq!(cfg.max_backoff, Duration::from_secs(10));
    }
}
