//! JSON payload formats of the text artifacts.

use serde::{Deserialize, Serialize};

/// Where a transcript came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptSource {
    /// Speech-to-text over the downloaded audio.
    Speech,
    /// Subtitles published with the video.
    Subtitles,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// `transcript` artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<Segment>,
    pub source: TranscriptSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Transcript {
    pub fn from_subtitles(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            segments: Vec::new(),
            source: TranscriptSource::Subtitles,
            language: None,
        }
    }
}

/// `summary` artifact: the model's summary plus its hierarchical outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryDocument {
    pub summary: String,
    /// Markdown bullet list, two spaces per level. May be empty.
    #[serde(default)]
    pub outline: String,
    /// Set when the transcript was cut to fit the model input limit.
    #[serde(default)]
    pub truncated_input: bool,
}

/// One node of a mind map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindmapNode {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MindmapNode>,
}

impl MindmapNode {
    pub fn leaf(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            children: Vec::new(),
        }
    }

    /// Number of nodes in this subtree, self included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(MindmapNode::node_count).sum::<usize>()
    }

    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(MindmapNode::depth).max().unwrap_or(0)
    }
}

/// `mindmap` artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindmapDocument {
    pub title: String,
    /// Cleaned Markdown outline (renderable by markmap).
    pub markdown: String,
    pub root: MindmapNode,
}

/// Metadata reported by the media fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: String,
    pub duration_secs: f64,
}
