//! Job stage state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::artifact::ArtifactKind;

/// Position of a job in the pipeline.
///
/// State transitions:
/// - Queued -> Downloading -> Transcribing -> Summarizing -> GeneratingMindmap -> Completed
/// - any non-terminal -> Failed | Cancelled
///
/// Failed and Cancelled are terminal but can be re-entered through an explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Queued,
    Downloading,
    Transcribing,
    Summarizing,
    GeneratingMindmap,
    Completed,
    Failed,
    Cancelled,
}

impl Stage {
    /// Stages backed by an executor, in execution order.
    pub const EXECUTABLE: [Stage; 4] = [
        Stage::Downloading,
        Stage::Transcribing,
        Stage::Summarizing,
        Stage::GeneratingMindmap,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed | Stage::Cancelled)
    }

    pub fn is_executable(self) -> bool {
        self.output_kind().is_some()
    }

    /// The stage that follows this one on success.
    ///
    /// Terminal stages have no successor.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Queued => Some(Stage::Downloading),
            Stage::Downloading => Some(Stage::Transcribing),
            Stage::Transcribing => Some(Stage::Summarizing),
            Stage::Summarizing => Some(Stage::GeneratingMindmap),
            Stage::GeneratingMindmap => Some(Stage::Completed),
            Stage::Completed | Stage::Failed | Stage::Cancelled => None,
        }
    }

    /// Artifact this stage is responsible for producing.
    pub fn output_kind(self) -> Option<ArtifactKind> {
        match self {
            Stage::Downloading => Some(ArtifactKind::Audio),
            Stage::Transcribing => Some(ArtifactKind::Transcript),
            Stage::Summarizing => Some(ArtifactKind::Summary),
            Stage::GeneratingMindmap => Some(ArtifactKind::Mindmap),
            _ => None,
        }
    }

    /// Artifact the stage's executor consumes.
    pub fn input_kind(self) -> Option<ArtifactKind> {
        match self {
            Stage::Transcribing => Some(ArtifactKind::Audio),
            Stage::Summarizing => Some(ArtifactKind::Transcript),
            Stage::GeneratingMindmap => Some(ArtifactKind::Summary),
            _ => None,
        }
    }

    /// Ordinal among the executable stages (0-based), used for progress.
    pub fn ordinal(self) -> Option<usize> {
        Self::EXECUTABLE.iter().position(|s| *s == self)
    }

    /// This stage and every executable stage after it.
    pub fn downstream(self) -> impl Iterator<Item = Stage> {
        Self::EXECUTABLE.into_iter().filter(move |s| *s >= self)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Queued => "QUEUED",
            Stage::Downloading => "DOWNLOADING",
            Stage::Transcribing => "TRANSCRIBING",
            Stage::Summarizing => "SUMMARIZING",
            Stage::GeneratingMindmap => "GENERATING_MINDMAP",
            Stage::Completed => "COMPLETED",
            Stage::Failed => "FAILED",
            Stage::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "QUEUED" => Ok(Stage::Queued),
            "DOWNLOADING" | "DOWNLOAD" => Ok(Stage::Downloading),
            "TRANSCRIBING" | "TRANSCRIBE" => Ok(Stage::Transcribing),
            "SUMMARIZING" | "SUMMARIZE" => Ok(Stage::Summarizing),
            "GENERATING_MINDMAP" | "MINDMAP" => Ok(Stage::GeneratingMindmap),
            "COMPLETED" => Ok(Stage::Completed),
            "FAILED" => Ok(Stage::Failed),
            "CANCELLED" => Ok(Stage::Cancelled),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}
