use time::Duration;

/// What to do with a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryIn(Duration),
    Expire,
}

/// Retry policy for jobs whose logic failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failures tolerated before a job is expired instead of rescheduled.
    pub maximum_retry_count: i32,
    pub exponent: u32,
    pub base_delay_seconds: i64,
    /// Upper bound for a single delay, so large counts cannot overflow.
    pub max_delay_seconds: i64,
}

impl RetryPolicy {
    /// Return the backoff delay after the `error_count`-th failure.
    ///
    /// `error_count` counts the failure being handled, so the first failure uses 1.
    pub fn interval(&self, error_count: i32) -> Duration {
        // Step 1: Compute count^exponent, saturating instead of overflowing.
        let count = i64::from(error_count.max(0));
        let raw = count
            .checked_pow(self.exponent)
            .unwrap_or(i64::MAX)
            .saturating_add(self.base_delay_seconds);

        // Step 2: Cap at the max delay to avoid unbounded backoff.
        Duration::seconds(raw.min(self.max_delay_seconds))
    }

    /// Returns `true` when a job that has now failed `error_count` times must expire.
    pub fn should_expire(&self, error_count: i32) -> bool {
        error_count > self.maximum_retry_count
    }

    /// Decide between rescheduling and expiring after the `error_count`-th failure.
    pub fn decide(&self, error_count: i32) -> RetryDecision {
        if self.should_expire(error_count) {
            return RetryDecision::Expire;
        }

        RetryDecision::RetryIn(self.interval(error_count))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            maximum_retry_count: 15,
            exponent: 4,
            base_delay_seconds: 3,
            max_delay_seconds: 60 * 60 * 24 * 365,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RetryDecision, RetryPolicy};
    use time::Duration;

    #[test]
    fn given_first_failure_when_interval_called_should_wait_four_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.interval(1), Duration::seconds(4));
    }

    #[test]
    fn given_failures_when_interval_called_should_follow_count_to_the_fourth_plus_three() {
        let policy = RetryPolicy::default();
        for count in 1..=15 {
            let expected = i64::from(count).pow(4) + 3;
            assert_eq!(policy.interval(count), Duration::seconds(expected));
        }
    }

    #[test]
    fn given_huge_count_when_interval_called_should_cap_at_max() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.interval(i32::MAX),
            Duration::seconds(policy.max_delay_seconds)
        );
    }

    #[test]
    fn given_count_at_maximum_when_decided_should_still_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(15),
            RetryDecision::RetryIn(Duration::seconds(15_i64.pow(4) + 3))
        );
    }

    #[test]
    fn given_count_past_maximum_when_decided_should_expire() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(16), RetryDecision::Expire);
        assert!(!policy.should_expire(15));
    }
}
