use std::time::Duration;

/// Exponential backoff, matching §4.2's defaults verbatim: a 10s base, a
/// 10 minute ceiling, and a 5-attempt budget before a mutation is treated
/// as permanently indeterminate and surfaced to a human.
///
/// Deliberately un-jittered: §4.2 states the delay as the exact formula
/// `min(max_backoff, base × 2^(n-1))` and testable property 13 holds it to
/// that formula by equality, not by a bound. A single stuck mutation
/// racing a duplicate reconciler is not a failure mode this core defends
/// against (§1 Non-goals: no multi-node coordination), so there is no
/// thundering-herd concern jitter would be earning its keep against here.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(10),
            max: Duration::from_secs(600),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the `attempt`-th retry (1-indexed). Returns `None` once
    /// `attempt` exceeds `max_attempts` — the caller's cue to stop
    /// reconciling automatically and surface the mutation to a human
    /// (testable property 13).
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let exp = self.base.as_millis().saturating_mul(1u128 << (attempt - 1).min(20));
        let capped = exp.min(self.max.as_millis());
        Some(Duration::from_millis(capped as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_matches_the_exact_formula_from_section_4_2() {
        let policy = BackoffPolicy::default();
        for attempt in 1..=policy.max_attempts {
            let expected = policy.base * 2u32.pow(attempt - 1);
            let expected = expected.min(policy.max);
            assert_eq!(policy.delay_for_attempt(attempt).unwrap(), expected);
        }
        assert!(policy.delay_for_attempt(policy.max_attempts + 1).is_none());
        assert!(policy.delay_for_attempt(0).is_none());
    }

    #[test]
    fn delay_is_capped_once_the_exponential_exceeds_max() {
        let policy = BackoffPolicy { base: Duration::from_secs(10), max: Duration::from_secs(600), max_attempts: 10 };
        // 10s * 2^5 = 320s, * 2^6 = 640s > 600s cap.
        assert_eq!(policy.delay_for_attempt(6).unwrap(), Duration::from_secs(320));
        assert_eq!(policy.delay_for_attempt(7).unwrap(), Duration::from_secs(600));
        assert_eq!(policy.delay_for_attempt(10).unwrap(), Duration::from_secs(600));
    }
}
