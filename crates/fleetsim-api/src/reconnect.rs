// ── Reconnect policy ──
//
// Devices reconnect after every unsolicited disconnect. The default policy
// reconnects immediately with no retry cap; a backoff policy spreads
// reconnection storms across a fleet.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff configuration for device reconnection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Zero disables backoff
    /// entirely and every reconnect is immediate.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay.
    pub max_delay: Duration,

    /// Maximum consecutive reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl ReconnectConfig {
    /// Reconnect immediately, forever.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_retries: None,
        }
    }

    /// Exponential backoff from 1s up to 30s, retrying forever.
    pub fn backoff() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }

    pub fn is_immediate(&self) -> bool {
        self.initial_delay.is_zero()
    }

    /// Whether `attempt` (zero-based) is still within the retry budget.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_retries.is_none_or(|max| attempt < max)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::immediate()
    }
}

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 ± 0.25)`
///
/// Jitter is seeded from the attempt number so the schedule is
/// reproducible. Returns zero for an immediate policy.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    if config.is_immediate() {
        return Duration::ZERO;
    }

    let exponent = i32::try_from(attempt.min(31)).unwrap_or(31);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_immediate_and_unbounded() {
        let config = ReconnectConfig::default();
        assert!(config.is_immediate());
        assert!(config.max_retries.is_none());
        assert!(config.allows(u32::MAX - 1));
        assert_eq!(calculate_backoff(5, &config), Duration::ZERO);
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::backoff();

        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);

        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: None,
        };

        let d10 = calculate_backoff(10, &config);
        // Jitter factor tops out at 1.25.
        assert!(
            d10 <= Duration::from_millis(12_500),
            "delay at attempt 10 ({d10:?}) should be capped near max_delay"
        );
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let config = ReconnectConfig::backoff();
        assert!(calculate_backoff(u32::MAX, &config) <= Duration::from_millis(37_500));
    }

    #[test]
    fn retry_budget() {
        let config = ReconnectConfig {
            max_retries: Some(2),
            ..ReconnectConfig::backoff()
        };
        assert!(config.allows(0));
        assert!(config.allows(1));
        assert!(!config.allows(2));
    }
}
