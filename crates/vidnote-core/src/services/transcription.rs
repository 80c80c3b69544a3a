//! Speech-to-text service.
//!
//! [`HttpTranscriptionService`] talks to a Whisper HTTP server:
//! `POST /transcribe` (text only) or `POST /transcribe/detail` (with
//! segments), multipart `file` + `language`, answering
//! `{"success", "text", "segments", "error"}`.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::domain::{Segment, Transcript, TranscriptSource};

#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub audio: Vec<u8>,
    pub file_name: String,
    pub language: Option<String>,
    /// Ask for segment timestamps.
    pub timestamps: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum TranscriptionError {
    /// Service unreachable or failing; worth retrying.
    #[error("transcription service unavailable: {0}")]
    Unavailable(String),

    /// The service refused this audio.
    #[error("audio rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait TranscriptionService: Send + Sync {
    async fn transcribe(&self, request: TranscriptionRequest) -> Result<Transcript, TranscriptionError>;
}

#[derive(Debug, Deserialize)]
struct SegmentBody {
    start: f64,
    end: f64,
    text: String,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    success: bool,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    segments: Vec<SegmentBody>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpTranscriptionService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTranscriptionService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TranscriptionService for HttpTranscriptionService {
    async fn transcribe(&self, request: TranscriptionRequest) -> Result<Transcript, TranscriptionError> {
        let endpoint = if request.timestamps {
            "transcribe/detail"
        } else {
            "transcribe"
        };
        let url = format!("{}/{endpoint}", self.base_url);

        let part = Part::bytes(request.audio)
            .file_name(request.file_name)
            .mime_str("audio/mpeg")
            .map_err(|e| TranscriptionError::Rejected(e.to_string()))?;
        let mut form = Form::new().part("file", part);
        if let Some(language) = &request.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TranscriptionError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(TranscriptionError::Unavailable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(TranscriptionError::Rejected(format!("HTTP {status}")));
        }

        let body: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::Unavailable(format!("unreadable response: {e}")))?;
        into_transcript(body, request.language)
    }
}

fn into_transcript(
    body: TranscribeResponse,
    requested_language: Option<String>,
) -> Result<Transcript, TranscriptionError> {
    if !body.success {
        return Err(TranscriptionError::Rejected(
            body.error.unwrap_or_else(|| "unknown error".into()),
        ));
    }

    let segments: Vec<Segment> = body
        .segments
        .into_iter()
        .map(|s| Segment {
            start: s.start,
            end: s.end,
            text: s.text.trim().to_string(),
        })
        .collect();
    let text = match body.text {
        Some(text) if !text.trim().is_empty() => text,
        _ => segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
    };

    Ok(Transcript {
        text,
        segments,
        source: TranscriptSource::Speech,
        language: body.language.or(requested_language),
    })
}
