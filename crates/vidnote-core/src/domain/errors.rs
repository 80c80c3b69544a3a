//! Error taxonomy.
//!
//! Executors fail with [`StageError`], stores with [`StorageError`], and
//! callers of the controller see [`PipelineError`]. All three collapse into
//! the caller-visible [`ErrorKind`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::artifact::ArtifactKind;
use super::stage::Stage;
use super::video::VideoId;

/// Caller-visible error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad reference or request. Not retried.
    InputError,
    /// Network, rate limit, timeout. Retried per stage policy.
    TransientServiceError,
    /// Unsupported content or format. Not retried.
    PermanentServiceError,
    /// Local persistence failure. Fatal for the current attempt.
    StorageError,
    /// Duplicate submission; resolved by attaching to the running job.
    ConcurrencyConflict,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InputError => "InputError",
            ErrorKind::TransientServiceError => "TransientServiceError",
            ErrorKind::PermanentServiceError => "PermanentServiceError",
            ErrorKind::StorageError => "StorageError",
            ErrorKind::ConcurrencyConflict => "ConcurrencyConflict",
        };
        f.write_str(s)
    }
}

/// Typed failure of one executor call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    #[error("invalid video reference: {0}")]
    InvalidReference(String),

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("transcription service unavailable: {0}")]
    TranscriptionServiceUnavailable(String),

    #[error("unsupported audio: {0}")]
    UnsupportedAudio(String),

    #[error("model service error: {message}")]
    ModelService {
        message: String,
        /// Set when the service asked us to slow down.
        retry_after: Option<Duration>,
    },

    #[error("model service rejected the request: {0}")]
    ModelRejected(String),

    #[error("content too large: {size} chars exceeds limit of {limit}")]
    ContentTooLarge { size: usize, limit: usize },

    #[error("malformed {kind} artifact: {message}")]
    MalformedInput { kind: ArtifactKind, message: String },

    #[error("stage call timed out after {0:?}")]
    Timeout(Duration),

    /// The executor panicked. Never retried.
    #[error("executor panicked: {0}")]
    ExecutorPanicked(String),
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::InvalidReference(_) => ErrorKind::InputError,
            StageError::FetchFailed(_)
            | StageError::TranscriptionServiceUnavailable(_)
            | StageError::ModelService { .. }
            | StageError::Timeout(_) => ErrorKind::TransientServiceError,
            StageError::UnsupportedAudio(_)
            | StageError::ModelRejected(_)
            | StageError::ContentTooLarge { .. }
            | StageError::MalformedInput { .. }
            | StageError::ExecutorPanicked(_) => ErrorKind::PermanentServiceError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientServiceError
    }

    /// Backoff hint supplied by the service (rate limiting).
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            StageError::ModelService { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Local persistence failure.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage write failed for {target}: {source}")]
    WriteFailed {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("storage read failed for {target}: {source}")]
    ReadFailed {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact missing: {0}")]
    MissingArtifact(String),

    #[error("artifact corrupt: {reference} (expected digest {expected}, found {actual})")]
    CorruptArtifact {
        reference: String,
        expected: String,
        actual: String,
    },

    #[error("record for {target} could not be encoded/decoded: {source}")]
    Serialization {
        target: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage task failed: {0}")]
    Background(String),
}

impl StorageError {
    /// True for integrity errors on referenced data (read side).
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            StorageError::ReadFailed { .. }
                | StorageError::MissingArtifact(_)
                | StorageError::CorruptArtifact { .. }
        )
    }
}

/// Errors returned to callers of the controller.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid video reference: {0}")]
    InvalidReference(String),

    #[error("no job for video {0}")]
    JobNotFound(VideoId),

    #[error("cannot {action} job {video_id} in stage {stage}")]
    InvalidTransition {
        video_id: VideoId,
        stage: Stage,
        action: &'static str,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidReference(_)
            | PipelineError::JobNotFound(_)
            | PipelineError::InvalidTransition { .. } => ErrorKind::InputError,
            PipelineError::Storage(_) => ErrorKind::StorageError,
        }
    }
}

/// Last failure recorded on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub stage: Stage,
    pub message: String,
    pub retryable: bool,
}

impl JobError {
    pub fn from_stage_error(stage: Stage, err: &StageError) -> Self {
        Self {
            kind: err.kind(),
            stage,
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }

    pub fn from_storage_error(stage: Stage, err: &StorageError) -> Self {
        Self {
            kind: ErrorKind::StorageError,
            stage,
            message: err.to_string(),
            retryable: !err.is_integrity_error(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.kind, self.stage, self.message)
    }
}
