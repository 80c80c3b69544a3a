//! Caller-facing views of jobs.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{ArtifactKind, ErrorKind, Job, Stage, VideoId};

/// What a caller needs to show one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub video_id: VideoId,
    pub source_ref: String,
    pub title: Option<String>,
    pub stage: Stage,
    pub progress_percent: u8,
    /// A driver is working on the job right now.
    pub running: bool,
    pub attempts_in_stage: u32,
    pub artifacts: Vec<ArtifactKind>,
    pub failed_stage: Option<Stage>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    /// `retry` would be accepted.
    pub retry_possible: bool,
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    pub fn from_job(job: &Job, running: bool) -> Self {
        let error = job.error.as_ref();
        let stuck = matches!(job.stage, Stage::Failed | Stage::Cancelled) || error.is_some();
        Self {
            video_id: job.video_id.clone(),
            source_ref: job.source_ref.clone(),
            title: job.media.as_ref().map(|m| m.title.clone()),
            stage: job.stage,
            progress_percent: job.progress_percent(),
            running,
            attempts_in_stage: job.attempts_for(job.stage),
            artifacts: job.artifacts.keys().copied().collect(),
            failed_stage: error.map(|e| e.stage),
            error_kind: error.map(|e| e.kind),
            error_message: error.map(|e| e.message.clone()),
            retry_possible: !running && stuck,
            updated_at: job.updated_at,
        }
    }
}

/// Jobs per stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineCounts {
    pub queued: usize,
    pub downloading: usize,
    pub transcribing: usize,
    pub summarizing: usize,
    pub generating_mindmap: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Jobs with a live driver.
    pub running: usize,
}

impl PipelineCounts {
    pub fn add(&mut self, stage: Stage) {
        match stage {
            Stage::Queued => self.queued += 1,
            Stage::Downloading => self.downloading += 1,
            Stage::Transcribing => self.transcribing += 1,
            Stage::Summarizing => self.summarizing += 1,
            Stage::GeneratingMindmap => self.generating_mindmap += 1,
            Stage::Completed => self.completed += 1,
            Stage::Failed => self.failed += 1,
            Stage::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.queued
            + self.downloading
            + self.transcribing
            + self.summarizing
            + self.generating_mindmap
            + self.completed
            + self.failed
            + self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobError;

    #[test]
    fn failed_job_exposes_error_and_retry() {
        let mut job = Job::new(VideoId::new("BV1"), "BV1", Utc::now());
        job.stage = Stage::Failed;
        job.error = Some(JobError {
            kind: ErrorKind::InputError,
            stage: Stage::Downloading,
            message: "not a video".into(),
            retryable: false,
        });

        let status = JobStatus::from_job(&job, false);

        assert_eq!(status.failed_stage, Some(Stage::Downloading));
        assert_eq!(status.error_kind, Some(ErrorKind::InputError));
        assert!(status.retry_possible);
    }

    #[test]
    fn running_job_cannot_be_retried() {
        let job = Job::new(VideoId::new("BV1"), "BV1", Utc::now());
        let status = JobStatus::from_job(&job, true);
        assert!(!status.retry_possible);
        assert!(status.error_kind.is_none());
    }

    #[test]
    fn counts_add_up() {
        let mut counts = PipelineCounts::default();
        for stage in [Stage::Queued, Stage::Completed, Stage::Completed, Stage::Failed] {
            counts.add(stage);
        }
        assert_eq!(counts.completed, 2);
        assert_eq!(counts.total(), 4);
    }
}
