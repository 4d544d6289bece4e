// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic exponential backoff for send retries.

use std::time::Duration;

/// Retry policy for outbound sends.
///
/// The delay after the n-th failed attempt is
/// `base_delay * multiplier^(n-1)`, with no jitter, so retry timing is
/// reproducible. A provider-supplied `Retry-After` hint wins when it is
/// longer than the computed delay.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the attempt following failed attempt number `attempt`
    /// (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        self.base_delay.mul_f64(factor)
    }

    /// Delay to honor given an optional provider hint.
    pub fn delay_with_hint(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let computed = self.delay_after(attempt);
        match retry_after {
            Some(hint) if hint > computed => hint,
            _ => computed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_per_attempt() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(8));
    }

    #[test]
    fn provider_hint_extends_but_never_shortens() {
        let policy = BackoffPolicy::default();
        assert_eq!(
            policy.delay_with_hint(1, Some(Duration::from_secs(30))),
            Duration::from_secs(30)
        );
        assert_eq!(
            policy.delay_with_hint(3, Some(Duration::from_secs(1))),
            Duration::from_secs(4)
        );
        assert_eq!(policy.delay_with_hint(2, None), Duration::from_secs(2));
    }

    #[test]
    fn custom_multiplier() {
        let policy = BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 3.0,
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1500));
        assert_eq!(policy.delay_after(3), Duration::from_millis(4500));
    }
}
