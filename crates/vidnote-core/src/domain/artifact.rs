//! Artifacts: immutable payloads produced by stages.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::video::VideoId;

/// The four artifact kinds the pipeline produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Audio,
    Transcript,
    Summary,
    Mindmap,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Audio,
        ArtifactKind::Transcript,
        ArtifactKind::Summary,
        ArtifactKind::Mindmap,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Audio => "audio",
            ArtifactKind::Transcript => "transcript",
            ArtifactKind::Summary => "summary",
            ArtifactKind::Mindmap => "mindmap",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference into the artifact store. Jobs hold these, never content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub video_id: VideoId,
    pub kind: ArtifactKind,
    /// SHA-256 of the content, hex encoded.
    pub digest: String,
    pub size: u64,
    /// Monotonic per (video_id, kind); starts at 1.
    pub version: u32,
    pub produced_at: DateTime<Utc>,
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@v{} ({})",
            self.video_id,
            self.kind,
            self.version,
            &self.digest[..self.digest.len().min(12)]
        )
    }
}

/// An artifact with its content loaded.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub reference: ArtifactRef,
    pub content: Vec<u8>,
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        self.reference.kind
    }

    /// Decode a JSON payload (transcript, summary, mindmap).
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.content)
    }
}

/// SHA-256 hex digest used for content addressing.
pub fn content_digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_hex() {
        let d = content_digest(b"hello");
        assert_eq!(
            d,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ArtifactKind::Transcript).unwrap(),
            "\"transcript\""
        );
    }
}
