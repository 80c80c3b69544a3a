//! ArtifactStore port: content-addressed storage of stage outputs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Artifact, ArtifactKind, ArtifactRef, StorageError, VideoId};

/// Stores artifact content keyed by (video, kind).
///
/// # Contract
/// - `put` returns only after the content and its reference are durable.
/// - Writing identical content again returns the current reference
///   unchanged; different content bumps `version` and becomes current.
/// - `get` verifies the digest; a missing blob or a mismatch is an
///   integrity error ([`StorageError::is_integrity_error`]).
/// - Prior versions are listed by `versions` only when the store was built
///   to retain them.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(
        &self,
        video_id: &VideoId,
        kind: ArtifactKind,
        content: Vec<u8>,
        produced_at: DateTime<Utc>,
    ) -> Result<ArtifactRef, StorageError>;

    async fn get(&self, reference: &ArtifactRef) -> Result<Artifact, StorageError>;

    async fn exists(&self, video_id: &VideoId, kind: ArtifactKind) -> Result<bool, StorageError>;

    /// Superseded references, oldest first. Empty unless versions are retained.
    async fn versions(
        &self,
        video_id: &VideoId,
        kind: ArtifactKind,
    ) -> Result<Vec<ArtifactRef>, StorageError>;
}
