//! StageExecutor port: one capability per pipeline stage.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::{Artifact, ArtifactKind, Job, MediaInfo, Stage, StageError};

/// What an executor gets for one attempt.
#[derive(Debug, Clone)]
pub struct StageInput {
    /// Snapshot of the job at the start of the attempt.
    pub job: Job,
    /// The artifact named by `Stage::input_kind`, already loaded.
    pub input: Option<Artifact>,
    /// Fresh directory, removed after the attempt.
    pub scratch_dir: PathBuf,
}

impl StageInput {
    pub fn source_ref(&self) -> &str {
        &self.job.source_ref
    }

    /// The input artifact, or `MalformedInput` when it was not supplied.
    pub fn require_input(&self, kind: ArtifactKind) -> Result<&Artifact, StageError> {
        match &self.input {
            Some(artifact) if artifact.kind() == kind => Ok(artifact),
            _ => Err(StageError::MalformedInput {
                kind,
                message: "input artifact not supplied".into(),
            }),
        }
    }

    /// Decode the JSON input artifact of `kind`.
    pub fn decode_input<T: serde::de::DeserializeOwned>(
        &self,
        kind: ArtifactKind,
    ) -> Result<T, StageError> {
        self.require_input(kind)?
            .decode()
            .map_err(|e| StageError::MalformedInput {
                kind,
                message: e.to_string(),
            })
    }
}

/// What an executor produced. The controller stores it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutput {
    pub artifacts: Vec<(ArtifactKind, Vec<u8>)>,
    pub media: Option<MediaInfo>,
}

impl StageOutput {
    pub fn single(kind: ArtifactKind, content: Vec<u8>) -> Self {
        Self {
            artifacts: vec![(kind, content)],
            media: None,
        }
    }

    /// A single JSON-encoded artifact.
    pub fn json<T: Serialize>(kind: ArtifactKind, value: &T) -> Result<Self, StageError> {
        let content = serde_json::to_vec(value).map_err(|e| StageError::MalformedInput {
            kind,
            message: format!("encode failed: {e}"),
        })?;
        Ok(Self::single(kind, content))
    }

    pub fn with_media(mut self, media: MediaInfo) -> Self {
        self.media = Some(media);
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = ArtifactKind> + '_ {
        self.artifacts.iter().map(|(kind, _)| *kind)
    }
}

/// Performs one stage. Executors never touch job state or the stores.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> Stage;

    async fn execute(&self, input: StageInput) -> Result<StageOutput, StageError>;
}
