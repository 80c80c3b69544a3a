//! Driver: moves one job through its stages.
//!
//! Each step runs under the per-video lock: load, act, save, emit. The lock
//! is released between steps and during backoff. The driver deregisters
//! itself while still holding the lock, so a concurrent `submit` either sees
//! the running driver or a job it can safely start a new one for.
//!
//! ## Step
//! - cancel requested: mark CANCELLED and stop
//! - QUEUED: enter DOWNLOADING
//! - stage output already present: record a skip and move on
//! - otherwise: one attempt, then `Decider` on failure
//!
//! ## Cancellation
//! The flag is checked at the start of every step, when backoff ends, and
//! once more after the driver has left the registry. A `cancel` that found
//! the lock taken is therefore applied before the lock is released.
//!
//! ## Executor calls
//! Each call runs in its own task. A timeout aborts that task; a panic
//! becomes `StageError::ExecutorPanicked` and fails the job.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::controller::{CancelSignal, Inner};
use crate::config::StepMode;
use crate::domain::{
    Artifact, ArtifactRef, AttemptOutcome, AttemptRecord, Decision, Job, JobError, JobEvent,
    MediaInfo, RunId, Stage, StageError, StorageError, VideoId,
};
use crate::ports::{StageExecutor, StageInput, StageOutput};

/// What the loop does after a step.
enum Flow {
    Continue,
    Backoff(Duration),
    Stop,
}

/// Why an attempt did not produce stored outputs.
enum AttemptError {
    Stage(StageError),
    Storage(StorageError),
}

pub(crate) async fn run(
    inner: Arc<Inner>,
    video_id: VideoId,
    run_id: RunId,
    cancel: Arc<CancelSignal>,
) {
    tracing::debug!(video_id = %video_id, run_id = %run_id, "driver started");
    loop {
        let guard = inner.locks.lock(&video_id).await;
        match step(&inner, &video_id, run_id, &cancel).await {
            Flow::Continue => drop(guard),
            Flow::Backoff(delay) => {
                drop(guard);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {}
                }
            }
            Flow::Stop => {
                inner.drivers.lock().await.remove(&video_id);
                // A cancel that raced with this step found the lock taken.
                if cancel.is_cancelled() {
                    settle_cancel(&inner, &video_id, run_id).await;
                }
                drop(guard);
                break;
            }
        }
    }
    tracing::debug!(video_id = %video_id, run_id = %run_id, "driver stopped");
}

async fn step(inner: &Inner, video_id: &VideoId, run_id: RunId, cancel: &CancelSignal) -> Flow {
    let mut job = match inner.jobs.get(video_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            tracing::warn!(video_id = %video_id, "job record disappeared");
            return Flow::Stop;
        }
        Err(e) => {
            tracing::error!(video_id = %video_id, error = %e, "failed to load job");
            return Flow::Stop;
        }
    };
    if !job.is_active() {
        return Flow::Stop;
    }

    if cancel.is_cancelled() || job.cancel_requested {
        cancel_job(inner, job, run_id).await;
        return Flow::Stop;
    }

    let now = inner.clock.now();

    if job.stage == Stage::Queued {
        job.enter_first_stage(now);
        return if save(inner, &job).await {
            Flow::Continue
        } else {
            Flow::Stop
        };
    }

    let stage = job.stage;
    if job.is_stage_satisfied(stage) {
        job.skip_stage(run_id, now);
        if !save(inner, &job).await {
            return Flow::Stop;
        }
        tracing::info!(video_id = %video_id, stage = %stage, "stage output present, skipped");
        inner
            .emit(
                JobEvent::StageSkipped {
                    video_id: video_id.clone(),
                    stage,
                },
                &job,
            )
            .await;
        return finish_if_completed(inner, &job).await;
    }

    attempt(inner, job, run_id).await
}

async fn cancel_job(inner: &Inner, mut job: Job, run_id: RunId) {
    let now = inner.clock.now();
    let stage = job.stage;
    job.request_cancel(now);
    job.mark_cancelled(Some(run_id), now);
    if save(inner, &job).await {
        tracing::info!(video_id = %job.video_id, stage = %stage, "job cancelled");
        inner
            .emit(
                JobEvent::Cancelled {
                    video_id: job.video_id.clone(),
                    stage,
                },
                &job,
            )
            .await;
    }
}

/// Apply a cancel request that arrived while the driver was stopping.
async fn settle_cancel(inner: &Inner, video_id: &VideoId, run_id: RunId) {
    match inner.jobs.get(video_id).await {
        Ok(Some(job)) if job.is_active() => cancel_job(inner, job, run_id).await,
        Ok(_) => {}
        Err(e) => tracing::error!(video_id = %video_id, error = %e, "failed to load job"),
    }
}

async fn attempt(inner: &Inner, mut job: Job, run_id: RunId) -> Flow {
    let stage = job.stage;
    let video_id = job.video_id.clone();
    let Some(executor) = inner.executors.get(stage).map(Arc::clone) else {
        // The builder refuses to start without a full registry.
        tracing::error!(video_id = %video_id, stage = %stage, "no executor registered");
        return Flow::Stop;
    };

    let number = job.begin_attempt();
    let attempt_id = inner.ids.attempt_id();
    let started_at = inner.clock.now();
    if !save(inner, &job).await {
        return Flow::Stop;
    }
    tracing::info!(video_id = %video_id, stage = %stage, attempt = number, "stage attempt started");
    inner
        .emit(
            JobEvent::StageStarted {
                video_id: video_id.clone(),
                stage,
                attempt: number,
            },
            &job,
        )
        .await;

    let result = run_attempt(inner, &job, executor).await;
    let record = |outcome| AttemptRecord {
        attempt_id,
        run_id,
        stage,
        number,
        started_at,
        finished_at: inner.clock.now(),
        outcome,
    };

    match result {
        Ok((refs, media)) => {
            job.record_attempt(record(AttemptOutcome::Success));
            on_success(inner, job, refs, media, run_id).await
        }
        Err(AttemptError::Stage(err)) => {
            let error = JobError::from_stage_error(stage, &err);
            job.record_attempt(record(AttemptOutcome::Failure {
                error: error.clone(),
            }));
            on_stage_failure(inner, job, err, error, number, run_id).await
        }
        Err(AttemptError::Storage(err)) => {
            let error = JobError::from_storage_error(stage, &err);
            job.record_attempt(record(AttemptOutcome::Failure {
                error: error.clone(),
            }));
            on_storage_failure(inner, job, error, run_id).await
        }
    }
}

/// Load the input, call the executor in a scratch directory, store outputs.
async fn run_attempt(
    inner: &Inner,
    job: &Job,
    executor: Arc<dyn StageExecutor>,
) -> Result<(Vec<ArtifactRef>, Option<MediaInfo>), AttemptError> {
    let stage = job.stage;
    let input = load_input(inner, job)
        .await
        .map_err(AttemptError::Storage)?;
    let scratch = create_scratch(&inner.settings.scratch_root, job)
        .await
        .map_err(AttemptError::Storage)?;

    let stage_input = StageInput {
        job: job.clone(),
        input,
        scratch_dir: scratch.path().to_path_buf(),
    };
    let limit = inner.settings.timeouts.for_stage(stage);
    let result = call_executor(executor, stage_input, limit).await;

    let scratch_path = scratch.path().display().to_string();
    if let Err(e) = scratch.close() {
        tracing::warn!(path = %scratch_path, error = %e, "failed to remove scratch directory");
    }

    let output = result.map_err(AttemptError::Stage)?;
    check_output(stage, &output).map_err(AttemptError::Stage)?;

    let produced_at = inner.clock.now();
    let mut refs = Vec::with_capacity(output.artifacts.len());
    for (kind, content) in output.artifacts {
        let reference = inner
            .artifacts
            .put(&job.video_id, kind, content, produced_at)
            .await
            .map_err(AttemptError::Storage)?;
        refs.push(reference);
    }
    Ok((refs, output.media))
}

/// Run the executor in its own task so a panic fails the attempt instead
/// of unwinding the driver. A zero `limit` means no timeout.
async fn call_executor(
    executor: Arc<dyn StageExecutor>,
    input: StageInput,
    limit: Duration,
) -> Result<StageOutput, StageError> {
    let call = tokio::spawn(async move { executor.execute(input).await });
    let abort = call.abort_handle();
    let joined = if limit.is_zero() {
        call.await
    } else {
        match tokio::time::timeout(limit, call).await {
            Ok(joined) => joined,
            Err(_) => {
                abort.abort();
                return Err(StageError::Timeout(limit));
            }
        }
    };
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(StageError::ExecutorPanicked(panic_message(e.into_panic()))),
        Err(e) => Err(StageError::ExecutorPanicked(e.to_string())),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map_or_else(|| "unknown panic".to_string(), |m| (*m).to_string()),
    }
}

async fn load_input(inner: &Inner, job: &Job) -> Result<Option<Artifact>, StorageError> {
    let Some(kind) = job.stage.input_kind() else {
        return Ok(None);
    };
    match job.artifact(kind) {
        Some(reference) => Ok(Some(inner.artifacts.get(reference).await?)),
        None => Ok(None),
    }
}

async fn create_scratch(root: &Path, job: &Job) -> Result<tempfile::TempDir, StorageError> {
    let target = root.display().to_string();
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|source| StorageError::WriteFailed {
            target: target.clone(),
            source,
        })?;
    let prefix = format!(
        "{}-{}-",
        job.video_id.storage_key(),
        job.stage.to_string().to_lowercase()
    );
    tempfile::Builder::new()
        .prefix(&prefix)
        .tempdir_in(root)
        .map_err(|source| StorageError::WriteFailed { target, source })
}

/// An executor may only produce its own artifact or downstream ones.
fn check_output(stage: Stage, output: &StageOutput) -> Result<(), StageError> {
    let Some(expected) = stage.output_kind() else {
        return Ok(());
    };
    if output.artifacts.is_empty() {
        return Err(StageError::MalformedInput {
            kind: expected,
            message: format!("{stage} produced no artifacts"),
        });
    }
    let allowed: Vec<_> = stage.downstream().filter_map(Stage::output_kind).collect();
    if let Some(kind) = output.kinds().find(|k| !allowed.contains(k)) {
        return Err(StageError::MalformedInput {
            kind,
            message: format!("{stage} may not produce {kind}"),
        });
    }
    if let Some((kind, _)) = output.artifacts.iter().find(|(_, c)| c.is_empty()) {
        return Err(StageError::MalformedInput {
            kind: *kind,
            message: "empty artifact".into(),
        });
    }
    Ok(())
}

async fn on_success(
    inner: &Inner,
    mut job: Job,
    refs: Vec<ArtifactRef>,
    media: Option<MediaInfo>,
    run_id: RunId,
) -> Flow {
    let stage = job.stage;
    job.record_success(refs.clone(), media, run_id, inner.clock.now());
    if !save(inner, &job).await {
        return Flow::Stop;
    }
    tracing::info!(
        video_id = %job.video_id,
        stage = %stage,
        artifacts = refs.len(),
        "stage completed"
    );
    inner
        .emit(
            JobEvent::StageCompleted {
                video_id: job.video_id.clone(),
                stage,
                artifacts: refs,
            },
            &job,
        )
        .await;

    if job.stage == Stage::Completed {
        return finish_if_completed(inner, &job).await;
    }
    if inner.settings.step_mode == StepMode::Pause {
        tracing::info!(video_id = %job.video_id, next_stage = %job.stage, "paused");
        inner
            .emit(
                JobEvent::Paused {
                    video_id: job.video_id.clone(),
                    next_stage: job.stage,
                },
                &job,
            )
            .await;
        return Flow::Stop;
    }
    Flow::Continue
}

async fn on_stage_failure(
    inner: &Inner,
    mut job: Job,
    err: StageError,
    error: JobError,
    attempt: u32,
    run_id: RunId,
) -> Flow {
    let stage = job.stage;
    let now = inner.clock.now();
    match inner.decider.decide(&job, &err) {
        Decision::Retry { delay, reason } => {
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            job.schedule_retry(error.clone(), delay_ms, reason, run_id, now);
            if !save(inner, &job).await {
                return Flow::Stop;
            }
            tracing::warn!(
                video_id = %job.video_id,
                stage = %stage,
                attempt,
                delay_ms,
                error = %err,
                "stage attempt failed, retrying"
            );
            inner
                .emit(
                    JobEvent::RetryScheduled {
                        video_id: job.video_id.clone(),
                        stage,
                        attempt,
                        delay,
                        error,
                    },
                    &job,
                )
                .await;
            Flow::Backoff(delay)
        }
        Decision::Fail { reason } => {
            job.mark_failed(error.clone(), reason.clone(), run_id, now);
            if !save(inner, &job).await {
                return Flow::Stop;
            }
            tracing::error!(
                video_id = %job.video_id,
                stage = %stage,
                attempt,
                error = %err,
                reason = %reason,
                "job failed"
            );
            inner
                .emit(
                    JobEvent::Failed {
                        video_id: job.video_id.clone(),
                        error,
                    },
                    &job,
                )
                .await;
            Flow::Stop
        }
    }
}

async fn on_storage_failure(inner: &Inner, mut job: Job, error: JobError, run_id: RunId) -> Flow {
    let stage = job.stage;
    job.halt(error.clone(), run_id, inner.clock.now());
    tracing::error!(
        video_id = %job.video_id,
        stage = %stage,
        error = %error.message,
        "storage failure, job halted"
    );
    if save(inner, &job).await {
        inner
            .emit(
                JobEvent::Halted {
                    video_id: job.video_id.clone(),
                    stage,
                    error,
                },
                &job,
            )
            .await;
    }
    Flow::Stop
}

async fn finish_if_completed(inner: &Inner, job: &Job) -> Flow {
    if job.stage != Stage::Completed {
        return Flow::Continue;
    }
    tracing::info!(video_id = %job.video_id, "job completed");
    inner
        .emit(
            JobEvent::Completed {
                video_id: job.video_id.clone(),
            },
            job,
        )
        .await;
    Flow::Stop
}

/// Persist the job; a failure is logged and stops the driver.
async fn save(inner: &Inner, job: &Job) -> bool {
    match inner.jobs.save(job).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(video_id = %job.video_id, stage = %job.stage, error = %e, "failed to save job");
            false
        }
    }
}
