//! Retry policy: decides backoff delays.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::millis;

/// Exponential backoff for failed attempts, capped at `max_delay`.
///
/// JSON / TOML では `base_delay_ms`, `multiplier`, `max_delay_ms` として書く。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay for the first retry.
    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay,
        }
    }

    /// 待たずに即再試行する（テストや CLI の検証用）
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, 1.0, Duration::ZERO)
    }

    /// Calculate delay for the next retry based on attempt number.
    ///
    /// `attempts` は失敗した試行までの回数（1 始まり）。
    /// delay = base_delay * multiplier^(attempts - 1)、ただし max_delay で頭打ち。
    ///
    /// base=1s, multiplier=2.0, max=5s の場合:
    /// - attempt 1: 1s
    /// - attempt 2: 2s
    /// - attempt 3: 4s
    /// - attempt 4: 5s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let cap_secs = self.max_delay.as_secs_f64();

        // powi は巨大な attempts で inf になりうるので、変換前に頭打ちする
        if !delay_secs.is_finite() || delay_secs >= cap_secs {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay_secs.max(0.0))
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.multiplier
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(format!(
                "backoff max_delay ({:?}) is smaller than base_delay ({:?})",
                self.max_delay, self.base_delay
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(1), 2.0, Duration::from_secs(5))
    }

    #[rstest]
    #[case::first_failure(1, 1)]
    #[case::second(2, 2)]
    #[case::third(3, 4)]
    #[case::capped(4, 5)]
    #[case::far_beyond_cap(60, 5)]
    fn exponential_backoff_is_capped(#[case] attempts: u32, #[case] secs: u64) {
        assert_eq!(policy().next_delay(attempts), Duration::from_secs(secs));
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        assert_eq!(policy().next_delay(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn immediate_policy_never_waits() {
        let p = RetryPolicy::immediate();
        assert_eq!(p.next_delay(1), Duration::ZERO);
        assert_eq!(p.next_delay(10), Duration::ZERO);
    }

    #[test]
    fn rejects_shrinking_multiplier() {
        let p = RetryPolicy::new(Duration::from_secs(1), 0.5, Duration::from_secs(5));
        assert!(p.validate().is_err());
        assert!(policy().validate().is_ok());
    }

    #[test]
    fn serializes_delays_as_millis() {
        let json = serde_json::to_value(policy()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "base_delay_ms": 1000, "multiplier": 2.0, "max_delay_ms": 5000 })
        );
    }
}
