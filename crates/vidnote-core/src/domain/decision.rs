//! Decision model: what to do after a stage attempt fails.
//!
//! The [`Decider`] is a pure function of the job and the failure. Applying
//! the decision (sleeping, persisting, moving to FAILED) is the driver's job.

use std::time::Duration;

use super::errors::StageError;
use super::job::Job;
use super::retry::RetryPolicy;

/// Next action after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Retry the same stage after a delay.
    Retry { delay: Duration, reason: String },

    /// Give up; the job moves to FAILED.
    Fail { reason: String },
}

pub trait Decider: Send + Sync {
    /// `job.attempts_for(job.stage)` already counts the failed attempt.
    fn decide(&self, job: &Job, error: &StageError) -> Decision;
}

/// Attempt-budget retry with exponential backoff.
///
/// Non-retryable errors fail immediately. A service-supplied `retry_after`
/// hint replaces the computed delay when it is longer.
#[derive(Debug, Clone, Default)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, job: &Job, error: &StageError) -> Decision {
        let attempts = job.attempts_for(job.stage);
        let max = self.retry_policy.max_attempts;

        if !error.is_retryable() {
            return Decision::Fail {
                reason: format!("{} is not retryable", error.kind()),
            };
        }
        if !self.retry_policy.allows_another(attempts) {
            return Decision::Fail {
                reason: format!("max attempts reached: {attempts}/{max}"),
            };
        }

        let mut delay = self.retry_policy.next_delay(attempts);
        if let Some(hint) = error.retry_after() {
            delay = delay.max(hint);
        }
        Decision::Retry {
            delay,
            reason: format!("retry attempt {}/{max} after {delay:?}", attempts + 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Stage, VideoId};
    use chrono::Utc;

    fn job_with_attempts(n: u32) -> Job {
        let mut job = Job::new(VideoId::new("BV1"), "BV1", Utc::now());
        job.stage = Stage::Transcribing;
        for _ in 0..n {
            job.begin_attempt();
        }
        job
    }

    fn transient() -> StageError {
        StageError::TranscriptionServiceUnavailable("503".into())
    }

    #[test]
    fn retries_with_backoff_until_budget_is_spent() {
        let decider = DefaultDecider::default();

        match decider.decide(&job_with_attempts(1), &transient()) {
            Decision::Retry { delay, .. } => assert_eq!(delay, Duration::from_secs(1)),
            other => panic!("expected retry, got {other:?}"),
        }
        match decider.decide(&job_with_attempts(2), &transient()) {
            Decision::Retry { delay, .. } => assert_eq!(delay, Duration::from_secs(2)),
            other => panic!("expected retry, got {other:?}"),
        }
        assert!(matches!(
            decider.decide(&job_with_attempts(3), &transient()),
            Decision::Fail { .. }
        ));
    }

    #[test]
    fn permanent_errors_fail_on_first_attempt() {
        let decider = DefaultDecider::default();
        let err = StageError::UnsupportedAudio("codec".into());
        assert!(matches!(
            decider.decide(&job_with_attempts(1), &err),
            Decision::Fail { .. }
        ));
    }

    #[test]
    fn rate_limit_hint_extends_delay() {
        let decider = DefaultDecider::default();
        let err = StageError::ModelService {
            message: "429".into(),
            retry_after: Some(Duration::from_secs(30)),
        };
        match decider.decide(&job_with_attempts(1), &err) {
            Decision::Retry { delay, .. } => assert_eq!(delay, Duration::from_secs(30)),
            other => panic!("expected retry, got {other:?}"),
        }
    }
}
