//! TRANSCRIBING: speech-to-text over the downloaded audio.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{ArtifactKind, Stage, StageError};
use crate::ports::{StageExecutor, StageInput, StageOutput};
use crate::services::{TranscriptionError, TranscriptionRequest, TranscriptionService};

pub struct Transcriber {
    service: Arc<dyn TranscriptionService>,
    language: Option<String>,
    timestamps: bool,
}

impl Transcriber {
    pub fn new(service: Arc<dyn TranscriptionService>) -> Self {
        Self {
            service,
            language: None,
            timestamps: true,
        }
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }
}

impl From<TranscriptionError> for StageError {
    fn from(err: TranscriptionError) -> Self {
        match err {
            TranscriptionError::Unavailable(msg) => StageError::TranscriptionServiceUnavailable(msg),
            TranscriptionError::Rejected(msg) => StageError::UnsupportedAudio(msg),
        }
    }
}

#[async_trait]
impl StageExecutor for Transcriber {
    fn stage(&self) -> Stage {
        Stage::Transcribing
    }

    async fn execute(&self, input: StageInput) -> Result<StageOutput, StageError> {
        let audio = input.require_input(ArtifactKind::Audio)?;
        if audio.content.is_empty() {
            return Err(StageError::UnsupportedAudio("audio is empty".into()));
        }

        let transcript = self
            .service
            .transcribe(TranscriptionRequest {
                audio: audio.content.clone(),
                file_name: format!("{}.mp3", input.job.video_id.storage_key()),
                language: self.language.clone(),
                timestamps: self.timestamps,
            })
            .await?;
        if transcript.text.trim().is_empty() {
            return Err(StageError::UnsupportedAudio("no speech recognized".into()));
        }

        tracing::debug!(
            video_id = %input.job.video_id,
            chars = transcript.text.chars().count(),
            segments = transcript.segments.len(),
            "transcribed"
        );
        StageOutput::json(ArtifactKind::Transcript, &transcript)
    }
}
