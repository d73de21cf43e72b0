//! Retry backoff policy.
//!
//! Delays grow exponentially per attempt with a hard cap, plus bounded random
//! jitter so a batch of jobs failing together doesn't retry in lockstep.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with cap and optional jitter.
///
/// The delay before attempt `n` (n >= 2) is `base * 2^(n-2)`, capped at
/// `max_delay`. With jitter enabled a random offset in `[0, base/2)` is
/// added, still bounded by the cap.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,

    /// Hard ceiling on the computed delay.
    pub max_delay: Duration,

    /// Whether to add random jitter.
    pub jitter: bool,
}

impl BackoffPolicy {
    /// Computes the delay before the given attempt number (2-based: attempt 1
    /// is the initial run and has no delay).
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        // 2^(attempt-2), saturating so absurd attempt numbers stay finite.
        let exponent = attempt - 2;
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        let exp_delay = self.base.checked_mul(multiplier).unwrap_or(self.max_delay);
        let capped = exp_delay.min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let jitter_range_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let limit_ms = jitter_range_ms.min(remaining_ms);
        if limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}
