//! In-memory job store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{Job, StorageError, VideoId};
use crate::ports::JobStore;

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<VideoId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get_or_create(
        &self,
        video_id: &VideoId,
        source_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<Job, StorageError> {
        let mut jobs = self.jobs.lock().await;
        Ok(jobs
            .entry(video_id.clone())
            .or_insert_with(|| Job::new(video_id.clone(), source_ref, now))
            .clone())
    }

    async fn save(&self, job: &Job) -> Result<(), StorageError> {
        self.jobs
            .lock()
            .await
            .insert(job.video_id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, video_id: &VideoId) -> Result<Option<Job>, StorageError> {
        Ok(self.jobs.lock().await.get(video_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Job>, StorageError> {
        let mut jobs: Vec<Job> = self.jobs.lock().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.video_id.cmp(&b.video_id)));
        Ok(jobs)
    }
}
