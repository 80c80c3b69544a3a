//! Filesystem job store: one pretty-printed JSON file per video.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::fs_util::{blocking, read_json, write_json};
use crate::domain::{Job, StorageError, VideoId};
use crate::ports::JobStore;

#[derive(Debug, Clone)]
pub struct FsJobStore {
    root: PathBuf,
}

impl FsJobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, video_id: &VideoId) -> PathBuf {
        self.root.join(format!("{}.json", video_id.storage_key()))
    }
}

#[async_trait]
impl JobStore for FsJobStore {
    async fn get_or_create(
        &self,
        video_id: &VideoId,
        source_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<Job, StorageError> {
        let path = self.path_for(video_id);
        let video_id = video_id.clone();
        let source_ref = source_ref.to_string();

        blocking(move || {
            if let Some(job) = read_json::<Job>(&path)? {
                return Ok(job);
            }
            let job = Job::new(video_id, source_ref, now);
            write_json(&path, &job)?;
            Ok(job)
        })
        .await
    }

    async fn save(&self, job: &Job) -> Result<(), StorageError> {
        let path = self.path_for(&job.video_id);
        let job = job.clone();
        blocking(move || write_json(&path, &job)).await
    }

    async fn get(&self, video_id: &VideoId) -> Result<Option<Job>, StorageError> {
        let path = self.path_for(video_id);
        blocking(move || read_json(&path)).await
    }

    async fn list(&self) -> Result<Vec<Job>, StorageError> {
        let root = self.root.clone();
        blocking(move || {
            let entries = match fs::read_dir(&root) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(source) => {
                    return Err(StorageError::ReadFailed {
                        target: root.display().to_string(),
                        source,
                    });
                }
            };

            let mut jobs = Vec::new();
            for entry in entries {
                let path = entry
                    .map_err(|source| StorageError::ReadFailed {
                        target: root.display().to_string(),
                        source,
                    })?
                    .path();
                if path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                match read_json::<Job>(&path) {
                    Ok(Some(job)) => jobs.push(job),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable job record"),
                }
            }
            jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.video_id.cmp(&b.video_id)));
            Ok(jobs)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Stage;

    #[tokio::test]
    async fn records_survive_a_new_store_instance() {
        let root = tempfile::tempdir().unwrap();
        let id = VideoId::new("BV1");

        {
            let store = FsJobStore::new(root.path());
            let mut job = store.get_or_create(&id, "BV1", Utc::now()).await.unwrap();
            job.stage = Stage::Summarizing;
            job.begin_attempt();
            store.save(&job).await.unwrap();
        }

        let store = FsJobStore::new(root.path());
        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.stage, Stage::Summarizing);
        assert_eq!(job.attempts_for(Stage::Summarizing), 1);
    }

    #[tokio::test]
    async fn list_skips_foreign_and_broken_files() {
        let root = tempfile::tempdir().unwrap();
        let store = FsJobStore::new(root.path());
        store
            .get_or_create(&VideoId::new("BV1"), "BV1", Utc::now())
            .await
            .unwrap();
        std::fs::write(root.path().join("notes.txt"), "x").unwrap();
        std::fs::write(root.path().join("broken.json"), "{").unwrap();

        let jobs = store.list().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].video_id.as_str(), "BV1");
    }

    #[tokio::test]
    async fn list_of_missing_root_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let store = FsJobStore::new(root.path().join("absent"));
        assert!(store.list().await.unwrap().is_empty());
    }
}
