//! Domain model: ids, stages, artifacts, jobs and the retry decision.
//!
//! Everything here is plain data plus pure functions. No I/O.

pub mod artifact;
pub mod attempt;
pub mod decision;
pub mod documents;
pub mod errors;
pub mod events;
pub mod ids;
pub mod job;
pub mod retry;
pub mod stage;
pub mod video;

pub use artifact::{Artifact, ArtifactKind, ArtifactRef, content_digest};
pub use attempt::{AttemptOutcome, AttemptRecord, DecisionKind, DecisionRecord};
pub use decision::{Decider, Decision, DefaultDecider};
pub use documents::{
    MediaInfo, MindmapDocument, MindmapNode, Segment, SummaryDocument, Transcript,
    TranscriptSource,
};
pub use errors::{ErrorKind, JobError, PipelineError, StageError, StorageError};
pub use events::JobEvent;
pub use ids::{AttemptId, RunId};
pub use job::Job;
pub use retry::RetryPolicy;
pub use stage::Stage;
pub use video::{EmptyReference, RefKind, VideoId};
