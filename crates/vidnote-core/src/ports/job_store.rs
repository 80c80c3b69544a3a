//! JobStore port: the durable record of every job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Job, StorageError, VideoId};

/// One record per `video_id`.
///
/// `save` replaces the whole record atomically; readers never observe a
/// partially written job. The controller serializes writers per video.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Load the job for `video_id`, creating a QUEUED one if none exists.
    async fn get_or_create(
        &self,
        video_id: &VideoId,
        source_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<Job, StorageError>;

    async fn save(&self, job: &Job) -> Result<(), StorageError>;

    async fn get(&self, video_id: &VideoId) -> Result<Option<Job>, StorageError>;

    async fn list(&self) -> Result<Vec<Job>, StorageError>;

    /// The job for `video_id` if it is not in a terminal stage.
    async fn find_active(&self, video_id: &VideoId) -> Result<Option<Job>, StorageError> {
        Ok(self.get(video_id).await?.filter(Job::is_active))
    }
}
