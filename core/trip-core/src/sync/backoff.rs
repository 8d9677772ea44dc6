//! Spacing for automatic sync retries after consecutive failures.
//!
//! Manual sync requests ignore this; only connectivity-triggered and periodic
//! attempts wait.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const BACKOFF_STEP_SECS: i64 = 10;
const BACKOFF_MAX_SECS: i64 = 60;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryState {
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl RetryState {
    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(now);
    }

    pub fn record_success(&mut self) {
        *self = RetryState::default();
    }

    pub fn delay(&self) -> Duration {
        let secs = BACKOFF_STEP_SECS
            .saturating_mul(i64::from(self.consecutive_failures))
            .min(BACKOFF_MAX_SECS);
        Duration::seconds(secs)
    }

    pub fn next_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.last_failure_at.map(|at| at + self.delay())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at().map_or(true, |at| now >= at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 30, 12, 0, 0).unwrap()
    }

    #[test]
    fn no_failures_is_always_due() {
        assert!(RetryState::default().is_due(now()));
    }

    #[test]
    fn delay_grows_per_failure() {
        let mut state = RetryState::default();
        state.record_failure(now());
        assert_eq!(state.delay(), Duration::seconds(BACKOFF_STEP_SECS));
        assert!(!state.is_due(now() + Duration::seconds(5)));
        assert!(state.is_due(now() + Duration::seconds(10)));
        state.record_failure(now());
        assert_eq!(state.delay(), Duration::seconds(20));
    }

    #[test]
    fn delay_is_capped() {
        let mut state = RetryState::default();
        for _ in 0..20 {
            state.record_failure(now());
        }
        assert_eq!(state.delay(), Duration::seconds(BACKOFF_MAX_SECS));
    }

    #[test]
    fn success_resets() {
        let mut state = RetryState::default();
        state.record_failure(now());
        state.record_success();
        assert_eq!(state, RetryState::default());
    }
}
