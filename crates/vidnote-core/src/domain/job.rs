//! Job record and its state transitions.
//!
//! Same shape as a queue task record: one record is the single source of
//! truth for a video, and state only changes through the methods below
//! (the controller loads, calls one of them, and saves).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::artifact::{ArtifactKind, ArtifactRef};
use super::attempt::{AttemptRecord, DecisionKind, DecisionRecord};
use super::documents::MediaInfo;
use super::errors::JobError;
use super::ids::RunId;
use super::stage::Stage;
use super::video::VideoId;

/// One tracked attempt to turn a video reference into a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub video_id: VideoId,
    pub source_ref: String,
    pub stage: Stage,

    /// Attempts made in the current entry of each stage.
    #[serde(default)]
    pub attempt_count_by_stage: BTreeMap<Stage, u32>,

    #[serde(default)]
    pub artifacts: BTreeMap<ArtifactKind, ArtifactRef>,

    /// Last failure; cleared on the next successful transition.
    #[serde(default)]
    pub error: Option<JobError>,

    #[serde(default)]
    pub cancel_requested: bool,

    #[serde(default)]
    pub media: Option<MediaInfo>,

    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,

    #[serde(default)]
    pub decisions: Vec<DecisionRecord>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(video_id: VideoId, source_ref: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            video_id,
            source_ref: source_ref.into(),
            stage: Stage::Queued,
            attempt_count_by_stage: BTreeMap::new(),
            artifacts: BTreeMap::new(),
            error: None,
            cancel_requested: false,
            media: None,
            attempts: Vec::new(),
            decisions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.stage.is_terminal()
    }

    pub fn attempts_for(&self, stage: Stage) -> u32 {
        self.attempt_count_by_stage.get(&stage).copied().unwrap_or(0)
    }

    pub fn artifact(&self, kind: ArtifactKind) -> Option<&ArtifactRef> {
        self.artifacts.get(&kind)
    }

    /// A stage is satisfied when its own output, or the output of any later
    /// stage, is already referenced. Later outputs make earlier ones moot
    /// (subtitles give a transcript without any audio).
    pub fn is_stage_satisfied(&self, stage: Stage) -> bool {
        stage
            .downstream()
            .filter_map(Stage::output_kind)
            .any(|kind| self.artifacts.contains_key(&kind))
    }

    /// First executable stage whose output is still missing, or `Completed`.
    pub fn resume_stage(&self) -> Stage {
        Stage::EXECUTABLE
            .into_iter()
            .find(|s| !self.is_stage_satisfied(*s))
            .unwrap_or(Stage::Completed)
    }

    /// Rough progress for display, 0..=100.
    pub fn progress_percent(&self) -> u8 {
        if self.stage == Stage::Completed {
            return 100;
        }
        let done = Stage::EXECUTABLE
            .into_iter()
            .filter(|s| self.is_stage_satisfied(*s))
            .count();
        (done * 100 / Stage::EXECUTABLE.len()) as u8
    }

    /// Queued -> Downloading.
    pub fn enter_first_stage(&mut self, now: DateTime<Utc>) {
        if self.stage == Stage::Queued {
            self.stage = Stage::Downloading;
            self.updated_at = now;
        }
    }

    /// Count a new attempt of the current stage and return its number.
    pub fn begin_attempt(&mut self) -> u32 {
        let count = self.attempt_count_by_stage.entry(self.stage).or_insert(0);
        *count += 1;
        *count
    }

    pub fn record_attempt(&mut self, record: AttemptRecord) {
        self.attempts.push(record);
    }

    /// Store the stage outputs and move to the next stage.
    pub fn record_success(
        &mut self,
        produced: Vec<ArtifactRef>,
        media: Option<MediaInfo>,
        run_id: RunId,
        now: DateTime<Utc>,
    ) {
        let stage = self.stage;
        let kinds: Vec<String> = produced.iter().map(|r| r.kind.to_string()).collect();
        for artifact in produced {
            self.artifacts.insert(artifact.kind, artifact);
        }
        if media.is_some() {
            self.media = media;
        }
        self.error = None;
        self.decisions.push(DecisionRecord::new(
            run_id,
            stage,
            DecisionKind::Advance,
            format!("produced {}", kinds.join(", ")),
            now,
        ));
        self.advance(now);
    }

    /// Move past a stage whose output is already present.
    pub fn skip_stage(&mut self, run_id: RunId, now: DateTime<Utc>) {
        self.decisions.push(DecisionRecord::new(
            run_id,
            self.stage,
            DecisionKind::Skip,
            "output already present",
            now,
        ));
        self.advance(now);
    }

    pub fn schedule_retry(
        &mut self,
        error: JobError,
        delay_ms: u64,
        reason: impl Into<String>,
        run_id: RunId,
        now: DateTime<Utc>,
    ) {
        self.decisions.push(
            DecisionRecord::new(run_id, self.stage, DecisionKind::Retry, reason, now)
                .with_delay_ms(delay_ms),
        );
        self.error = Some(error);
        self.updated_at = now;
    }

    pub fn mark_failed(
        &mut self,
        error: JobError,
        reason: impl Into<String>,
        run_id: RunId,
        now: DateTime<Utc>,
    ) {
        self.decisions.push(DecisionRecord::new(
            run_id,
            self.stage,
            DecisionKind::Fail,
            reason,
            now,
        ));
        self.error = Some(error);
        self.stage = Stage::Failed;
        self.updated_at = now;
    }

    /// Record a storage failure; the job stays in its last good stage.
    pub fn halt(&mut self, error: JobError, run_id: RunId, now: DateTime<Utc>) {
        self.decisions.push(DecisionRecord::new(
            run_id,
            self.stage,
            DecisionKind::Halt,
            error.message.clone(),
            now,
        ));
        self.error = Some(error);
        self.updated_at = now;
    }

    pub fn request_cancel(&mut self, now: DateTime<Utc>) {
        self.cancel_requested = true;
        self.updated_at = now;
    }

    pub fn mark_cancelled(&mut self, run_id: Option<RunId>, now: DateTime<Utc>) {
        if let Some(run_id) = run_id {
            self.decisions.push(DecisionRecord::new(
                run_id,
                self.stage,
                DecisionKind::Cancel,
                "cancel requested",
                now,
            ));
        }
        self.stage = Stage::Cancelled;
        self.updated_at = now;
    }

    /// Re-enter the pipeline after a failure, cancellation or halt.
    ///
    /// `from_current_stage` resumes at the first stage whose output is missing
    /// with a fresh attempt budget; otherwise everything is redone from QUEUED.
    pub fn reenter(&mut self, from_current_stage: bool, run_id: RunId, now: DateTime<Utc>) {
        let previous = self.stage;
        if from_current_stage {
            let stage = self.resume_stage();
            self.attempt_count_by_stage.remove(&stage);
            self.stage = stage;
        } else {
            self.artifacts.clear();
            self.attempt_count_by_stage.clear();
            self.media = None;
            self.stage = Stage::Queued;
        }
        self.error = None;
        self.cancel_requested = false;
        self.decisions.push(DecisionRecord::new(
            run_id,
            self.stage,
            DecisionKind::Reenter,
            format!("re-entered from {previous}"),
            now,
        ));
        self.updated_at = now;
    }

    /// Re-run `stage` and everything after it, keeping earlier outputs.
    ///
    /// Resumes earlier than `stage` when an upstream output is missing.
    pub fn restart_from(&mut self, stage: Stage, run_id: RunId, now: DateTime<Utc>) {
        for s in stage.downstream() {
            if let Some(kind) = s.output_kind() {
                self.artifacts.remove(&kind);
            }
            self.attempt_count_by_stage.remove(&s);
        }
        let previous = self.stage;
        // An earlier output may be missing too (subtitles carry no audio).
        self.stage = self.resume_stage().min(stage);
        self.error = None;
        self.cancel_requested = false;
        self.decisions.push(DecisionRecord::new(
            run_id,
            self.stage,
            DecisionKind::Reenter,
            format!("restart requested from {previous}"),
            now,
        ));
        self.updated_at = now;
    }

    fn advance(&mut self, now: DateTime<Utc>) {
        if let Some(next) = self.stage.next() {
            self.stage = next;
        }
        self.updated_at = now;
    }
}
