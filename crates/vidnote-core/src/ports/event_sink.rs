//! EventSink port: where job events go besides in-process subscribers.

use async_trait::async_trait;

use crate::domain::{Job, JobEvent, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum EventSinkError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot render note: {0}")]
    Render(String),
}

/// Receives every event with the job as it was saved.
///
/// Failures are logged by the controller and never affect the job.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &JobEvent, job: &Job) -> Result<(), EventSinkError>;
}

/// Drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn emit(&self, _event: &JobEvent, _job: &Job) -> Result<(), EventSinkError> {
        Ok(())
    }
}
