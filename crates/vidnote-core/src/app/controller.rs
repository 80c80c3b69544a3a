//! Pipeline controller: the caller surface.
//!
//! Every job is keyed by its `VideoId`. Mutations are load-mutate-save under
//! the per-video lock, and at most one driver task runs per video. The
//! driver releases the lock between attempts, so `cancel` and `get_status`
//! interleave with a running job.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify, broadcast, watch};

use super::driver;
use super::locks::KeyedLocks;
use super::registry::ExecutorRegistry;
use super::status::{JobStatus, PipelineCounts};
use crate::config::{StageTimeouts, StepMode};
use crate::domain::{
    Artifact, ArtifactKind, Decider, ErrorKind, Job, JobEvent, PipelineError, RunId, Stage,
    VideoId,
};
use crate::ports::{ArtifactStore, Clock, EventSink, IdGenerator, JobStore};

/// Cancellation request for a running driver.
#[derive(Default)]
pub(crate) struct CancelSignal {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub(crate) fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called.
    pub(crate) async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

pub(crate) struct DriverHandle {
    pub(crate) run_id: RunId,
    pub(crate) cancel: Arc<CancelSignal>,
    pub(crate) done: watch::Receiver<bool>,
}

#[derive(Debug, Clone)]
pub(crate) struct DriverSettings {
    pub(crate) step_mode: StepMode,
    pub(crate) timeouts: StageTimeouts,
    pub(crate) scratch_root: PathBuf,
}

pub(crate) struct Inner {
    pub(crate) jobs: Arc<dyn JobStore>,
    pub(crate) artifacts: Arc<dyn ArtifactStore>,
    pub(crate) executors: ExecutorRegistry,
    pub(crate) decider: Arc<dyn Decider>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) settings: DriverSettings,
    pub(crate) locks: KeyedLocks<VideoId>,
    pub(crate) drivers: Mutex<HashMap<VideoId, DriverHandle>>,
    pub(crate) events: broadcast::Sender<JobEvent>,
}

impl Inner {
    /// Offer an event to the sink, then to subscribers.
    pub(crate) async fn emit(&self, event: JobEvent, job: &Job) {
        if let Err(e) = self.sink.emit(&event, job).await {
            tracing::warn!(video_id = %job.video_id, error = %e, "event sink failed");
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Drives videos through download, transcription, summary and mind map.
///
/// Cheap to clone; clones share the same stores and drivers.
#[derive(Clone)]
pub struct PipelineController {
    inner: Arc<Inner>,
}

impl PipelineController {
    pub(crate) fn from_inner(inner: Inner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Start (or join) processing of `source_ref`.
    ///
    /// - no job yet: a QUEUED job is created and a driver started
    /// - a driver is already running: the call attaches to it
    /// - COMPLETED: nothing happens
    /// - FAILED/CANCELLED: the job resumes at its first missing output
    /// - interrupted or paused: a driver is started from the current stage
    pub async fn submit(&self, source_ref: &str) -> Result<VideoId, PipelineError> {
        let video_id = VideoId::from_source_ref(source_ref)
            .map_err(|e| PipelineError::InvalidReference(e.to_string()))?;
        let _guard = self.inner.locks.lock(&video_id).await;

        let running = self
            .inner
            .drivers
            .lock()
            .await
            .get(&video_id)
            .map(|h| h.run_id);
        if let Some(run_id) = running {
            tracing::debug!(
                video_id = %video_id,
                run_id = %run_id,
                kind = %ErrorKind::ConcurrencyConflict,
                "duplicate submission attached to running job"
            );
            return Ok(video_id);
        }

        let now = self.inner.clock.now();
        let run_id = self.inner.ids.run_id();
        match self.inner.jobs.get(&video_id).await? {
            None => {
                let job = self
                    .inner
                    .jobs
                    .get_or_create(&video_id, source_ref.trim(), now)
                    .await?;
                tracing::info!(video_id = %video_id, source_ref = %job.source_ref, "job submitted");
                self.inner
                    .emit(
                        JobEvent::Submitted {
                            video_id: video_id.clone(),
                            source_ref: job.source_ref.clone(),
                        },
                        &job,
                    )
                    .await;
            }
            Some(job) if job.stage == Stage::Completed => {
                tracing::debug!(video_id = %video_id, "already completed");
                return Ok(video_id);
            }
            Some(mut job) if job.stage.is_terminal() => {
                job.reenter(true, run_id, now);
                self.inner.jobs.save(&job).await?;
                tracing::info!(video_id = %video_id, stage = %job.stage, "resubmitted job resumes");
            }
            Some(_) => {}
        }

        self.spawn_driver(&video_id, run_id).await;
        Ok(video_id)
    }

    pub async fn get_status(&self, video_id: &VideoId) -> Result<Job, PipelineError> {
        self.inner
            .jobs
            .get(video_id)
            .await?
            .ok_or_else(|| PipelineError::JobNotFound(video_id.clone()))
    }

    /// Status view with error details and whether `retry` is possible.
    pub async fn status(&self, video_id: &VideoId) -> Result<JobStatus, PipelineError> {
        let job = self.get_status(video_id).await?;
        let running = self.is_running(video_id).await;
        Ok(JobStatus::from_job(&job, running))
    }

    /// Request cancellation.
    ///
    /// A running driver stops at the next stage boundary or before its next
    /// attempt; a job without a driver is cancelled immediately. Artifacts
    /// are kept.
    pub async fn cancel(&self, video_id: &VideoId) -> Result<Job, PipelineError> {
        let job = self.get_status(video_id).await?;
        match job.stage {
            Stage::Cancelled => return Ok(job),
            Stage::Completed | Stage::Failed => {
                return Err(PipelineError::InvalidTransition {
                    video_id: video_id.clone(),
                    stage: job.stage,
                    action: "cancel",
                });
            }
            _ => {}
        }

        let running = self
            .inner
            .drivers
            .lock()
            .await
            .get(video_id)
            .map(|h| (h.run_id, Arc::clone(&h.cancel)));

        match running {
            Some((run_id, signal)) => {
                signal.cancel();
                let guard = self.inner.locks.try_lock(video_id).await;
                let still_running = self
                    .inner
                    .drivers
                    .lock()
                    .await
                    .get(video_id)
                    .is_some_and(|h| h.run_id == run_id);
                match (guard, still_running) {
                    // Between attempts: persist the request for the driver.
                    (Some(_guard), true) => {
                        if let Some(mut job) = self.inner.jobs.get(video_id).await?
                            && job.is_active()
                        {
                            job.request_cancel(self.inner.clock.now());
                            self.inner.jobs.save(&job).await?;
                        }
                    }
                    // Mid-step: the driver checks the flag before it releases the lock.
                    (None, true) => {}
                    (guard, false) => {
                        drop(guard);
                        self.cancel_stopped(video_id).await?;
                    }
                }
                tracing::info!(video_id = %video_id, run_id = %run_id, "cancel requested");
            }
            None => self.cancel_stopped(video_id).await?,
        }
        self.get_status(video_id).await
    }

    /// Re-enter a stopped job.
    ///
    /// `from_current_stage` resumes at the first missing output with a fresh
    /// attempt budget; otherwise all references are dropped and the job
    /// starts over from QUEUED.
    pub async fn retry(
        &self,
        video_id: &VideoId,
        from_current_stage: bool,
    ) -> Result<Job, PipelineError> {
        let _guard = self.inner.locks.lock(video_id).await;
        let mut job = self.stopped_job(video_id, "retry").await?;
        if from_current_stage && job.stage == Stage::Completed {
            return Err(PipelineError::InvalidTransition {
                video_id: video_id.clone(),
                stage: job.stage,
                action: "retry",
            });
        }

        let run_id = self.inner.ids.run_id();
        job.reenter(from_current_stage, run_id, self.inner.clock.now());
        self.inner.jobs.save(&job).await?;
        tracing::info!(
            video_id = %video_id,
            stage = %job.stage,
            from_current_stage,
            "retry requested"
        );
        self.spawn_driver(video_id, run_id).await;
        Ok(job)
    }

    /// Re-run `stage` and everything after it.
    pub async fn restart_from(&self, video_id: &VideoId, stage: Stage) -> Result<Job, PipelineError> {
        let _guard = self.inner.locks.lock(video_id).await;
        let mut job = self.stopped_job(video_id, "restart").await?;
        if !stage.is_executable() {
            return Err(PipelineError::InvalidTransition {
                video_id: video_id.clone(),
                stage,
                action: "restart from",
            });
        }

        let run_id = self.inner.ids.run_id();
        job.restart_from(stage, run_id, self.inner.clock.now());
        self.inner.jobs.save(&job).await?;
        tracing::info!(video_id = %video_id, stage = %job.stage, "restart requested");
        self.spawn_driver(video_id, run_id).await;
        Ok(job)
    }

    /// Continue a job paused in step mode (or interrupted).
    pub async fn advance(&self, video_id: &VideoId) -> Result<Job, PipelineError> {
        let _guard = self.inner.locks.lock(video_id).await;
        let job = self.get_status(video_id).await?;
        if self.is_running(video_id).await {
            return Ok(job);
        }
        if job.stage.is_terminal() {
            return Err(PipelineError::InvalidTransition {
                video_id: video_id.clone(),
                stage: job.stage,
                action: "advance",
            });
        }
        self.spawn_driver(video_id, self.inner.ids.run_id()).await;
        Ok(job)
    }

    /// Wait for the current driver of `video_id` to stop, then return the job.
    pub async fn wait(&self, video_id: &VideoId) -> Result<Job, PipelineError> {
        let done = self
            .inner
            .drivers
            .lock()
            .await
            .get(video_id)
            .map(|h| h.done.clone());
        if let Some(mut done) = done {
            // A dropped sender also means the driver is gone.
            let _ = done.wait_for(|finished| *finished).await;
        }
        // A driver that is stopping still holds the lock.
        let _guard = self.inner.locks.lock(video_id).await;
        self.get_status(video_id).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    pub async fn list(&self) -> Result<Vec<Job>, PipelineError> {
        Ok(self.inner.jobs.list().await?)
    }

    pub async fn counts(&self) -> Result<PipelineCounts, PipelineError> {
        let mut counts = PipelineCounts::default();
        for job in self.inner.jobs.list().await? {
            counts.add(job.stage);
        }
        counts.running = self.inner.drivers.lock().await.len();
        Ok(counts)
    }

    /// Load a referenced artifact of a job.
    pub async fn artifact(
        &self,
        video_id: &VideoId,
        kind: ArtifactKind,
    ) -> Result<Option<Artifact>, PipelineError> {
        let job = self.get_status(video_id).await?;
        match job.artifact(kind) {
            Some(reference) => Ok(Some(self.inner.artifacts.get(reference).await?)),
            None => Ok(None),
        }
    }

    /// Restart drivers for jobs left mid-pipeline by a previous process.
    ///
    /// Jobs halted on a storage error wait for an explicit `retry`; jobs with
    /// a persisted cancel request are cancelled.
    pub async fn resume_interrupted(&self) -> Result<Vec<VideoId>, PipelineError> {
        let mut resumed = Vec::new();
        for job in self.inner.jobs.list().await? {
            if !job.is_active() || job.error.is_some() {
                continue;
            }
            let video_id = job.video_id.clone();
            let _guard = self.inner.locks.lock(&video_id).await;
            if self.is_running(&video_id).await {
                continue;
            }
            // The driver applies a persisted cancel request on its first step.
            self.spawn_driver(&video_id, self.inner.ids.run_id()).await;
            tracing::info!(video_id = %video_id, stage = %job.stage, "resumed interrupted job");
            resumed.push(video_id);
        }
        Ok(resumed)
    }

    pub async fn is_running(&self, video_id: &VideoId) -> bool {
        self.inner.drivers.lock().await.contains_key(video_id)
    }

    /// Cancel a job whose driver has stopped. A driver started in the
    /// meantime gets the request instead.
    async fn cancel_stopped(&self, video_id: &VideoId) -> Result<(), PipelineError> {
        let _guard = self.inner.locks.lock(video_id).await;
        let mut job = self.get_status(video_id).await?;
        if !job.is_active() {
            return Ok(());
        }
        let now = self.inner.clock.now();
        job.request_cancel(now);

        let signal = self
            .inner
            .drivers
            .lock()
            .await
            .get(video_id)
            .map(|h| Arc::clone(&h.cancel));
        if let Some(signal) = signal {
            self.inner.jobs.save(&job).await?;
            signal.cancel();
            return Ok(());
        }

        let stage = job.stage;
        job.mark_cancelled(None, now);
        self.inner.jobs.save(&job).await?;
        tracing::info!(video_id = %video_id, stage = %stage, "job cancelled");
        self.inner
            .emit(
                JobEvent::Cancelled {
                    video_id: video_id.clone(),
                    stage,
                },
                &job,
            )
            .await;
        Ok(())
    }

    /// Load a job that has no driver; `action` names the refused operation.
    async fn stopped_job(&self, video_id: &VideoId, action: &'static str) -> Result<Job, PipelineError> {
        let job = self.get_status(video_id).await?;
        if self.is_running(video_id).await {
            return Err(PipelineError::InvalidTransition {
                video_id: video_id.clone(),
                stage: job.stage,
                action,
            });
        }
        Ok(job)
    }

    /// Register and start a driver. The caller holds the video lock.
    async fn spawn_driver(&self, video_id: &VideoId, run_id: RunId) {
        let cancel = Arc::new(CancelSignal::default());
        let (done_tx, done_rx) = watch::channel(false);
        self.inner.drivers.lock().await.insert(
            video_id.clone(),
            DriverHandle {
                run_id,
                cancel: Arc::clone(&cancel),
                done: done_rx,
            },
        );
        let driver = tokio::spawn(driver::run(
            Arc::clone(&self.inner),
            video_id.clone(),
            run_id,
            cancel,
        ));

        // Waiters are released only once the registry entry is gone, even
        // when the driver died mid-step.
        let inner = Arc::clone(&self.inner);
        let video_id = video_id.clone();
        tokio::spawn(async move {
            if let Err(e) = driver.await {
                tracing::error!(video_id = %video_id, run_id = %run_id, error = %e, "driver aborted");
                let mut drivers = inner.drivers.lock().await;
                if drivers.get(&video_id).is_some_and(|h| h.run_id == run_id) {
                    drivers.remove(&video_id);
                }
            }
            done_tx.send_replace(true);
        });
    }
}
