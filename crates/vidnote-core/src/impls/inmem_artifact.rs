//! In-memory artifact store for tests and dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::placement::{Placement, place};
use crate::domain::{Artifact, ArtifactKind, ArtifactRef, StorageError, VideoId, content_digest};
use crate::ports::ArtifactStore;

type SlotKey = (VideoId, ArtifactKind);

#[derive(Default)]
struct Slot {
    current: Option<ArtifactRef>,
    versions: Vec<ArtifactRef>,
    /// digest -> content
    blobs: HashMap<String, Vec<u8>>,
}

/// Keeps everything in a map behind one async mutex.
///
/// `fail_writes` makes every `put` fail with `WriteFailed`, for exercising
/// the storage-failure path of the controller.
pub struct InMemoryArtifactStore {
    slots: Mutex<HashMap<SlotKey, Slot>>,
    retain_versions: bool,
    fail_writes: AtomicBool,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::with_retention(false)
    }

    pub fn with_retention(retain_versions: bool) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            retain_versions,
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Replace stored content without touching the reference.
    pub async fn tamper(&self, reference: &ArtifactRef, content: Vec<u8>) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(&(reference.video_id.clone(), reference.kind)) {
            slot.blobs.insert(reference.digest.clone(), content);
        }
    }

    /// Number of blobs held for (video, kind).
    pub async fn blob_count(&self, video_id: &VideoId, kind: ArtifactKind) -> usize {
        self.slots
            .lock()
            .await
            .get(&(video_id.clone(), kind))
            .map_or(0, |slot| slot.blobs.len())
    }
}

impl Default for InMemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(
        &self,
        video_id: &VideoId,
        kind: ArtifactKind,
        content: Vec<u8>,
        produced_at: DateTime<Utc>,
    ) -> Result<ArtifactRef, StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed {
                target: format!("{video_id}/{kind}"),
                source: std::io::Error::other("writes disabled"),
            });
        }

        let mut slots = self.slots.lock().await;
        let slot = slots.entry((video_id.clone(), kind)).or_default();

        match place(slot.current.as_ref(), video_id, kind, &content, produced_at) {
            Placement::Unchanged(current) => Ok(current),
            Placement::Replace { new, superseded } => {
                slot.blobs.insert(new.digest.clone(), content);
                if let Some(old) = superseded {
                    if self.retain_versions {
                        slot.versions.push(old);
                    } else {
                        slot.blobs.remove(&old.digest);
                    }
                }
                slot.current = Some(new.clone());
                Ok(new)
            }
        }
    }

    async fn get(&self, reference: &ArtifactRef) -> Result<Artifact, StorageError> {
        let slots = self.slots.lock().await;
        let content = slots
            .get(&(reference.video_id.clone(), reference.kind))
            .and_then(|slot| slot.blobs.get(&reference.digest))
            .cloned()
            .ok_or_else(|| StorageError::MissingArtifact(reference.to_string()))?;

        let actual = content_digest(&content);
        if actual != reference.digest {
            return Err(StorageError::CorruptArtifact {
                reference: reference.to_string(),
                expected: reference.digest.clone(),
                actual,
            });
        }
        Ok(Artifact {
            reference: reference.clone(),
            content,
        })
    }

    async fn exists(&self, video_id: &VideoId, kind: ArtifactKind) -> Result<bool, StorageError> {
        Ok(self
            .slots
            .lock()
            .await
            .get(&(video_id.clone(), kind))
            .is_some_and(|slot| slot.current.is_some()))
    }

    async fn versions(
        &self,
        video_id: &VideoId,
        kind: ArtifactKind,
    ) -> Result<Vec<ArtifactRef>, StorageError> {
        Ok(self
            .slots
            .lock()
            .await
            .get(&(video_id.clone(), kind))
            .map(|slot| slot.versions.clone())
            .unwrap_or_default())
    }
}
