//! DOWNLOADING: fetch the video's audio, or its subtitles when published.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{ArtifactKind, MediaInfo, Stage, StageError, Transcript};
use crate::ports::{StageExecutor, StageInput, StageOutput};
use crate::services::{FetchError, MediaFetcher};

pub struct Downloader {
    fetcher: Arc<dyn MediaFetcher>,
}

impl Downloader {
    pub fn new(fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self { fetcher }
    }
}

impl From<FetchError> for StageError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotAVideo(msg) => StageError::InvalidReference(msg),
            other => StageError::FetchFailed(other.to_string()),
        }
    }
}

#[async_trait]
impl StageExecutor for Downloader {
    fn stage(&self) -> Stage {
        Stage::Downloading
    }

    async fn execute(&self, input: StageInput) -> Result<StageOutput, StageError> {
        let fetched = self
            .fetcher
            .fetch(input.source_ref(), &input.scratch_dir)
            .await?;
        let media = MediaInfo {
            title: fetched.title,
            duration_secs: fetched.duration_secs,
        };

        // Published subtitles stand in for speech-to-text.
        if let Some(text) = fetched.subtitles {
            tracing::info!(video_id = %input.job.video_id, "using published subtitles");
            let transcript = Transcript::from_subtitles(text);
            return Ok(StageOutput::json(ArtifactKind::Transcript, &transcript)?.with_media(media));
        }

        let Some(path) = fetched.audio_path else {
            return Err(StageError::FetchFailed(
                "fetcher returned neither audio nor subtitles".into(),
            ));
        };
        let audio = tokio::fs::read(&path)
            .await
            .map_err(|e| StageError::FetchFailed(format!("cannot read {}: {e}", path.display())))?;
        Ok(StageOutput::single(ArtifactKind::Audio, audio).with_media(media))
    }
}
