//! Filesystem artifact store.
//!
//! Layout under the root:
//!
//! ```text
//! <video key>/<kind>/<sha256>        blob
//! <video key>/<kind>/current.json    current ArtifactRef
//! <video key>/<kind>/versions.json   superseded refs (retention only)
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::fs_util::{blocking, read_json, read_optional, remove_if_present, write_atomic, write_json};
use super::placement::{Placement, place};
use crate::domain::{Artifact, ArtifactKind, ArtifactRef, StorageError, VideoId, content_digest};
use crate::ports::ArtifactStore;

const CURRENT: &str = "current.json";
const VERSIONS: &str = "versions.json";

#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
    retain_versions: bool,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>, retain_versions: bool) -> Self {
        Self {
            root: root.into(),
            retain_versions,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn kind_dir(&self, video_id: &VideoId, kind: ArtifactKind) -> PathBuf {
        self.root.join(video_id.storage_key()).join(kind.as_str())
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(
        &self,
        video_id: &VideoId,
        kind: ArtifactKind,
        content: Vec<u8>,
        produced_at: DateTime<Utc>,
    ) -> Result<ArtifactRef, StorageError> {
        let dir = self.kind_dir(video_id, kind);
        let video_id = video_id.clone();
        let retain = self.retain_versions;

        blocking(move || {
            let current: Option<ArtifactRef> = read_json(&dir.join(CURRENT))?;
            match place(current.as_ref(), &video_id, kind, &content, produced_at) {
                Placement::Unchanged(current) if dir.join(&current.digest).exists() => {
                    Ok(current)
                }
                Placement::Unchanged(current) => {
                    // Reference survived but the blob did not; restore it.
                    write_atomic(&dir.join(&current.digest), &content)?;
                    Ok(current)
                }
                Placement::Replace { new, superseded } => {
                    write_atomic(&dir.join(&new.digest), &content)?;
                    if let Some(old) = &superseded
                        && retain
                    {
                        let mut versions: Vec<ArtifactRef> =
                            read_json(&dir.join(VERSIONS))?.unwrap_or_default();
                        versions.push(old.clone());
                        write_json(&dir.join(VERSIONS), &versions)?;
                    }
                    write_json(&dir.join(CURRENT), &new)?;

                    if let Some(old) = superseded
                        && !retain
                        && old.digest != new.digest
                        && let Err(e) = remove_if_present(&dir.join(&old.digest))
                    {
                        tracing::warn!(artifact = %old, error = %e, "failed to remove superseded blob");
                    }
                    Ok(new)
                }
            }
        })
        .await
    }

    async fn get(&self, reference: &ArtifactRef) -> Result<Artifact, StorageError> {
        let path = self
            .kind_dir(&reference.video_id, reference.kind)
            .join(&reference.digest);
        let reference = reference.clone();

        blocking(move || {
            let content = read_optional(&path)?
                .ok_or_else(|| StorageError::MissingArtifact(reference.to_string()))?;
            let actual = content_digest(&content);
            if actual != reference.digest {
                return Err(StorageError::CorruptArtifact {
                    reference: reference.to_string(),
                    expected: reference.digest.clone(),
                    actual,
                });
            }
            Ok(Artifact { reference, content })
        })
        .await
    }

    async fn exists(&self, video_id: &VideoId, kind: ArtifactKind) -> Result<bool, StorageError> {
        let dir = self.kind_dir(video_id, kind);
        blocking(move || {
            let current: Option<ArtifactRef> = read_json(&dir.join(CURRENT))?;
            Ok(current.is_some_and(|r| dir.join(r.digest).exists()))
        })
        .await
    }

    async fn versions(
        &self,
        video_id: &VideoId,
        kind: ArtifactKind,
    ) -> Result<Vec<ArtifactRef>, StorageError> {
        let path = self.kind_dir(video_id, kind).join(VERSIONS);
        blocking(move || Ok(read_json(&path)?.unwrap_or_default())).await
    }
}
