//! Attempt and decision records: the execution history of a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::JobError;
use super::ids::{AttemptId, RunId};
use super::stage::Stage;

/// How one executor call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    Success,
    Failure { error: JobError },
}

/// A single executor call for a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_id: AttemptId,
    pub run_id: RunId,
    pub stage: Stage,
    /// 1-based number within the current entry of the stage.
    pub number: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

/// What the controller decided at a stage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Stage succeeded; moved to the next one.
    Advance,
    /// Stage output already present; moved on without calling the executor.
    Skip,
    /// Retry the same stage after a delay.
    Retry,
    /// Give up; job is FAILED.
    Fail,
    /// Storage failure; job stays in its stage until retried.
    Halt,
    Cancel,
    /// Explicit caller retry or restart.
    Reenter,
}

/// Why the controller did what it did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub run_id: RunId,
    pub stage: Stage,
    pub decision: DecisionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    pub reason: String,
    pub decided_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(
        run_id: RunId,
        stage: Stage,
        decision: DecisionKind,
        reason: impl Into<String>,
        decided_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            stage,
            decision,
            delay_ms: None,
            reason: reason.into(),
            decided_at,
        }
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ErrorKind;
    use ulid::Ulid;

    #[test]
    fn failure_outcome_is_flattened_into_record() {
        let now = Utc::now();
        let rec = AttemptRecord {
            attempt_id: AttemptId::from_ulid(Ulid::new()),
            run_id: RunId::from_ulid(Ulid::new()),
            stage: Stage::Transcribing,
            number: 2,
            started_at: now,
            finished_at: now,
            outcome: AttemptOutcome::Failure {
                error: JobError {
                    kind: ErrorKind::TransientServiceError,
                    stage: Stage::Transcribing,
                    message: "down".into(),
                    retryable: true,
                },
            },
        };

        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["outcome"], "FAILURE");
        assert_eq!(v["error"]["kind"], "transient_service_error");
        assert_eq!(v["stage"], "TRANSCRIBING");

        let back: AttemptRecord = serde_json::from_value(v).unwrap();
        assert_eq!(back, rec);
        assert!(!back.succeeded());
    }
}
