//! Retry policy: decides when a failed row becomes claimable again.
//!
//! Exponential backoff with a cap and jitter. The exact schedule is policy,
//! not protocol: the store only sees the resulting `retry_at`.

use std::time::Duration;

use rand::Rng as _;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Backoff multiplier per additional failure.
    pub multiplier: f64,

    /// Upper bound on the computed delay.
    pub max_delay: Duration,

    /// Jitter fraction (0.1 = +/-10%), to keep workers from re-scanning in
    /// lockstep.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given the number of failures so far
    /// (1-indexed): `base * multiplier^(failures - 1)`, clamped, jittered.
    pub fn next_delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(63) as i32;
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        let capped = raw.min(self.max_delay.as_secs_f64());

        if self.jitter <= 0.0 {
            return Duration::from_secs_f64(capped);
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        Duration::from_secs_f64((capped * factor).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[rstest]
    #[case(1, 2)]
    #[case(2, 4)]
    #[case(3, 8)]
    #[case(5, 32)]
    fn backoff_doubles(#[case] failures: u32, #[case] secs: u64) {
        assert_eq!(no_jitter().next_delay(failures), Duration::from_secs(secs));
    }

    #[test]
    fn delay_is_capped() {
        let policy = no_jitter();
        assert_eq!(policy.next_delay(30), policy.max_delay);
    }

    #[test]
    fn jitter_stays_in_band() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let d = policy.next_delay(1).as_secs_f64();
            assert!((1.8..=2.2).contains(&d), "delay {d} out of band");
        }
    }
}
