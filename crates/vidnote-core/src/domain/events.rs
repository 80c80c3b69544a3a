//! Job lifecycle events, published to subscribers and to the event sink.

use std::time::Duration;

use serde::Serialize;

use super::artifact::ArtifactRef;
use super::errors::JobError;
use super::stage::Stage;
use super::video::VideoId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Submitted {
        video_id: VideoId,
        source_ref: String,
    },
    StageStarted {
        video_id: VideoId,
        stage: Stage,
        attempt: u32,
    },
    StageSkipped {
        video_id: VideoId,
        stage: Stage,
    },
    StageCompleted {
        video_id: VideoId,
        stage: Stage,
        artifacts: Vec<ArtifactRef>,
    },
    RetryScheduled {
        video_id: VideoId,
        stage: Stage,
        attempt: u32,
        #[serde(with = "duration_ms")]
        delay: Duration,
        error: JobError,
    },
    /// Step mode: waiting for `advance`.
    Paused {
        video_id: VideoId,
        next_stage: Stage,
    },
    /// Storage failure; the job stays in `stage` until retried.
    Halted {
        video_id: VideoId,
        stage: Stage,
        error: JobError,
    },
    Completed {
        video_id: VideoId,
    },
    Failed {
        video_id: VideoId,
        error: JobError,
    },
    Cancelled {
        video_id: VideoId,
        stage: Stage,
    },
}

impl JobEvent {
    pub fn video_id(&self) -> &VideoId {
        match self {
            JobEvent::Submitted { video_id, .. }
            | JobEvent::StageStarted { video_id, .. }
            | JobEvent::StageSkipped { video_id, .. }
            | JobEvent::StageCompleted { video_id, .. }
            | JobEvent::RetryScheduled { video_id, .. }
            | JobEvent::Paused { video_id, .. }
            | JobEvent::Halted { video_id, .. }
            | JobEvent::Completed { video_id }
            | JobEvent::Failed { video_id, .. }
            | JobEvent::Cancelled { video_id, .. } => video_id,
        }
    }

    /// True for events after which no driver is running for the job.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            JobEvent::Paused { .. }
                | JobEvent::Halted { .. }
                | JobEvent::Completed { .. }
                | JobEvent::Failed { .. }
                | JobEvent::Cancelled { .. }
        )
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().min(u64::MAX as u128) as u64)
    }
}
