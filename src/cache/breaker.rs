//! Failure circuit breaker for manifest generation

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Breaker thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    /// Consecutive failures before generation pauses (0 disables the breaker)
    pub pause_after_failures: u32,

    /// Cooldown measured from the first failure (zero disables this lane)
    pub pause_for: Duration,

    /// Cached failures served before retrying (0 disables this lane)
    pub pause_for_requests: u32,

    /// Maximum simultaneous generations
    pub parallelism_limit: usize,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            pause_after_failures: 3,
            pause_for: Duration::minutes(60),
            pause_for_requests: 0,
            parallelism_limit: 10,
        }
    }
}

impl BreakerPolicy {
    pub fn enabled(&self) -> bool {
        self.pause_after_failures > 0
    }
}

/// Cached state of a failing fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Start of the current failure cycle
    pub first_failure_at: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub cached_responses_returned: u32,

    /// Error text replayed while paused
    pub most_recent_error: String,
}

/// What to do with a request whose fingerprint holds a failure record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerDecision {
    /// Still below the threshold; render and keep counting
    Retry,

    /// A lane expired; drop the record and render as a new cycle
    Reset,

    /// Paused; return the cached error
    Replay(String),
}

impl FailureRecord {
    /// Start a new failure cycle
    pub fn new(error: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            first_failure_at: now,
            consecutive_failures: 1,
            cached_responses_returned: 0,
            most_recent_error: error.into(),
        }
    }

    /// Count another failure in this cycle
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.most_recent_error = error.into();
    }

    /// Whether the breaker is holding generation for this record
    pub fn is_paused(&self, policy: &BreakerPolicy) -> bool {
        policy.enabled() && self.consecutive_failures >= policy.pause_after_failures
    }

    /// Decide how to serve a request, counting a replay when one is returned.
    ///
    /// The time lane is checked before the request lane. Elapsed time counts
    /// whole minutes only.
    pub fn evaluate(&mut self, policy: &BreakerPolicy, now: DateTime<Utc>) -> BreakerDecision {
        if !self.is_paused(policy) {
            return BreakerDecision::Retry;
        }

        if policy.pause_for > Duration::zero() {
            let elapsed_minutes = (now - self.first_failure_at).num_minutes();
            if elapsed_minutes >= policy.pause_for.num_minutes() {
                return BreakerDecision::Reset;
            }
        }

        if policy.pause_for_requests > 0
            && self.cached_responses_returned >= policy.pause_for_requests
        {
            return BreakerDecision::Reset;
        }

        self.cached_responses_returned = self.cached_responses_returned.saturating_add(1);
        BreakerDecision::Replay(self.most_recent_error.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn policy(failures: u32, minutes: i64, requests: u32) -> BreakerPolicy {
        BreakerPolicy {
            pause_after_failures: failures,
            pause_for: Duration::minutes(minutes),
            pause_for_requests: requests,
            parallelism_limit: 1,
        }
    }

    #[test]
    fn below_threshold_retries() {
        let mut record = FailureRecord::new("boom", start());
        assert_eq!(record.evaluate(&policy(2, 0, 4), start()), BreakerDecision::Retry);
        assert_eq!(record.cached_responses_returned, 0);
    }

    #[test]
    fn paused_replays_and_counts() {
        let mut record = FailureRecord::new("boom", start());
        record.record_failure("boom again");

        let decision = record.evaluate(&policy(2, 0, 4), start());
        assert_eq!(decision, BreakerDecision::Replay("boom again".to_string()));
        assert_eq!(record.cached_responses_returned, 1);
    }

    #[test]
    fn request_lane_resets_after_budget() {
        let mut record = FailureRecord::new("boom", start());
        record.record_failure("boom");
        let policy = policy(2, 0, 2);

        assert!(matches!(record.evaluate(&policy, start()), BreakerDecision::Replay(_)));
        assert!(matches!(record.evaluate(&policy, start()), BreakerDecision::Replay(_)));
        assert_eq!(record.evaluate(&policy, start()), BreakerDecision::Reset);
    }

    #[test]
    fn time_lane_counts_whole_minutes() {
        let mut record = FailureRecord::new("boom", start());
        let policy = policy(1, 2, 0);

        let almost = start() + Duration::minutes(1) + Duration::seconds(59);
        assert!(matches!(record.evaluate(&policy, almost), BreakerDecision::Replay(_)));

        let expired = start() + Duration::minutes(2);
        assert_eq!(record.evaluate(&policy, expired), BreakerDecision::Reset);
    }

    #[test]
    fn disabled_breaker_never_pauses() {
        let mut record = FailureRecord::new("boom", start());
        for _ in 0..10 {
            record.record_failure("boom");
        }
        assert!(!record.is_paused(&policy(0, 60, 0)));
        assert_eq!(record.evaluate(&policy(0, 60, 0), start()), BreakerDecision::Retry);
    }

    #[test]
    fn no_lanes_pause_indefinitely() {
        let mut record = FailureRecord::new("boom", start());
        let later = start() + Duration::days(365);
        for _ in 0..100 {
            assert!(matches!(
                record.evaluate(&policy(1, 0, 0), later),
                BreakerDecision::Replay(_)
            ));
        }
    }

    #[test]
    fn record_keeps_first_failure_time() {
        let mut record = FailureRecord::new("first", start());
        record.record_failure("second");
        assert_eq!(record.first_failure_at, start());
        assert_eq!(record.consecutive_failures, 2);
        assert_eq!(record.most_recent_error, "second");
    }
}
