//! SUMMARIZING and GENERATING_MINDMAP.
//!
//! Both stages share one language model. The summarize call asks for a
//! summary and an outline in one response; the mind map stage turns that
//! outline into a tree, and only calls the model again when the outline
//! came back empty.

use std::sync::Arc;

use async_trait::async_trait;

use super::outline::{clean_outline, parse_response, parse_tree};
use crate::domain::{ArtifactKind, Job, MindmapDocument, Stage, StageError, SummaryDocument, Transcript};
use crate::ports::{StageExecutor, StageInput, StageOutput};
use crate::services::{ChatMessage, ChatRequest, LanguageModel, ModelError};

const TRUNCATION_MARKER: &str = "\n\n[content truncated]";

const SUMMARY_PROMPT: &str = "\
You analyze video transcripts and produce structured notes.

Answer in exactly this format, with no extra commentary:

## Summary
3 to 5 numbered key points, plain text, no bold.

## Mind Map
A Markdown bullet list (`-`), two spaces of indentation per level:
the first level is the video topic, the second the main sections, deeper
levels the concrete points. Do not wrap the list in a code block.";

const MINDMAP_PROMPT: &str = "\
Turn the summary below into a mind map.

Answer with a Markdown bullet list (`-`) only, two spaces of indentation
per level, the video topic as the single first-level item. Do not wrap the
list in a code block.";

#[derive(Debug, Clone, PartialEq)]
pub struct SummarizerOptions {
    /// Transcript length limit, in characters.
    pub max_input_chars: usize,
    /// Cut long transcripts instead of failing with `ContentTooLarge`.
    pub truncate_long_input: bool,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SummarizerOptions {
    fn default() -> Self {
        Self {
            max_input_chars: 16_000,
            truncate_long_input: true,
            temperature: 0.7,
            max_tokens: 8_000,
        }
    }
}

impl From<ModelError> for StageError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::RateLimited { retry_after } => StageError::ModelService {
                message: "rate limited".into(),
                retry_after,
            },
            ModelError::Unavailable(message) => StageError::ModelService {
                message,
                retry_after: None,
            },
            ModelError::Rejected(message) => StageError::ModelRejected(message),
        }
    }
}

fn video_title(job: &Job) -> String {
    job.media
        .as_ref()
        .map(|m| m.title.clone())
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| job.video_id.to_string())
}

/// Fit `text` into `limit` characters.
///
/// Returns the text to send and whether it was cut.
pub fn fit_input(text: &str, limit: usize, truncate: bool) -> Result<(String, bool), StageError> {
    let size = text.chars().count();
    if size <= limit {
        return Ok((text.to_string(), false));
    }
    if !truncate {
        return Err(StageError::ContentTooLarge { size, limit });
    }
    let mut cut: String = text.chars().take(limit).collect();
    cut.push_str(TRUNCATION_MARKER);
    Ok((cut, true))
}

pub struct Summarizer {
    model: Arc<dyn LanguageModel>,
    options: SummarizerOptions,
}

impl Summarizer {
    pub fn new(model: Arc<dyn LanguageModel>, options: SummarizerOptions) -> Self {
        Self { model, options }
    }
}

#[async_trait]
impl StageExecutor for Summarizer {
    fn stage(&self) -> Stage {
        Stage::Summarizing
    }

    async fn execute(&self, input: StageInput) -> Result<StageOutput, StageError> {
        let transcript: Transcript = input.decode_input(ArtifactKind::Transcript)?;
        if transcript.text.trim().is_empty() {
            return Err(StageError::MalformedInput {
                kind: ArtifactKind::Transcript,
                message: "transcript is empty".into(),
            });
        }

        let (text, truncated_input) = fit_input(
            &transcript.text,
            self.options.max_input_chars,
            self.options.truncate_long_input,
        )?;
        if truncated_input {
            tracing::warn!(
                video_id = %input.job.video_id,
                limit = self.options.max_input_chars,
                "transcript truncated to fit model input"
            );
        }

        let title = video_title(&input.job);
        let response = self
            .model
            .complete(ChatRequest {
                messages: vec![
                    ChatMessage::system(SUMMARY_PROMPT),
                    ChatMessage::user(format!(
                        "Video title: {title}\n\nTranscript:\n{text}\n\nWrite the summary and the mind map."
                    )),
                ],
                temperature: self.options.temperature,
                max_tokens: self.options.max_tokens,
            })
            .await?;

        let sections = parse_response(&response);
        tracing::debug!(
            video_id = %input.job.video_id,
            response_chars = response.len(),
            summary_chars = sections.summary.len(),
            outline_chars = sections.outline.len(),
            "parsed model response"
        );
        StageOutput::json(
            ArtifactKind::Summary,
            &SummaryDocument {
                summary: sections.summary,
                outline: sections.outline,
                truncated_input,
            },
        )
    }
}

pub struct MindmapGenerator {
    model: Arc<dyn LanguageModel>,
    options: SummarizerOptions,
}

impl MindmapGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, options: SummarizerOptions) -> Self {
        Self { model, options }
    }

    async fn outline_from_summary(&self, title: &str, summary: &str) -> Result<String, StageError> {
        let response = self
            .model
            .complete(ChatRequest {
                messages: vec![
                    ChatMessage::system(MINDMAP_PROMPT),
                    ChatMessage::user(format!("Video title: {title}\n\nSummary:\n{summary}")),
                ],
                temperature: self.options.temperature,
                max_tokens: self.options.max_tokens,
            })
            .await?;
        let sections = parse_response(&response);
        Ok(if sections.outline.is_empty() {
            sections.summary
        } else {
            sections.outline
        })
    }
}

#[async_trait]
impl StageExecutor for MindmapGenerator {
    fn stage(&self) -> Stage {
        Stage::GeneratingMindmap
    }

    async fn execute(&self, input: StageInput) -> Result<StageOutput, StageError> {
        let summary: SummaryDocument = input.decode_input(ArtifactKind::Summary)?;
        let title = video_title(&input.job);

        let raw = if summary.outline.trim().is_empty() && !summary.summary.trim().is_empty() {
            self.outline_from_summary(&title, &summary.summary).await?
        } else {
            summary.outline
        };

        let markdown = clean_outline(&raw, &title);
        let root = parse_tree(&markdown, &title);
        StageOutput::json(
            ArtifactKind::Mindmap,
            &MindmapDocument {
                title,
                markdown,
                root,
            },
        )
    }
}
