//! Controller behaviour against scripted executors and in-memory stores.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use common::{Harness, PauseGate, drain, subtitle_output, test_config, transient};
use vidnote_core::config::StepMode;
use vidnote_core::domain::{
    ArtifactKind, DecisionKind, ErrorKind, JobEvent, PipelineError, Stage, StageError, VideoId,
};
use vidnote_core::ports::{ArtifactStore, JobStore, StageInput, StageOutput};

#[tokio::test(start_paused = true)]
async fn bv123_recovers_from_transcription_outage() {
    let h = Harness::new();
    h.transcribe.fail_next([transient(), transient()]);
    let mut events = h.controller.subscribe();

    let video_id = h.controller.submit("BV123").await.unwrap();
    assert_eq!(video_id.as_str(), "BV123");
    let job = h.controller.wait(&video_id).await.unwrap();

    assert_eq!(job.stage, Stage::Completed);
    assert_eq!(job.attempts_for(Stage::Transcribing), 3);
    assert_eq!(job.artifacts.len(), 4);
    assert!(job.error.is_none());
    assert_eq!(h.download.calls(), 1);
    assert_eq!(h.transcribe.calls(), 3);
    assert_eq!(h.summarize.calls(), 1);
    assert_eq!(h.mindmap.calls(), 1);

    let events = drain(&mut events);
    let retries = events
        .iter()
        .filter(|e| matches!(e, JobEvent::RetryScheduled { .. }))
        .count();
    assert_eq!(retries, 2);
    assert!(matches!(events.last(), Some(JobEvent::Completed { .. })));

    // Stages only ever move forward.
    let started: Vec<Stage> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::StageStarted { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect();
    assert!(started.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn not_a_video_fails_without_retries() {
    let h = Harness::new();
    h.download
        .fail_always(StageError::InvalidReference("not-a-video".into()));

    let video_id = h.controller.submit("not-a-video").await.unwrap();
    let job = h.controller.wait(&video_id).await.unwrap();

    assert_eq!(job.stage, Stage::Failed);
    assert_eq!(h.download.calls(), 1);
    assert_eq!(h.transcribe.calls(), 0);
    let error = job.error.unwrap();
    assert_eq!(error.kind, ErrorKind::InputError);
    assert_eq!(error.stage, Stage::Downloading);
    assert!(!error.retryable);

    let status = h.controller.status(&video_id).await.unwrap();
    assert_eq!(status.failed_stage, Some(Stage::Downloading));
    assert_eq!(status.error_kind, Some(ErrorKind::InputError));
    assert!(status.retry_possible);
}

#[tokio::test(start_paused = true)]
async fn retry_budget_is_spent_with_exponential_backoff() {
    let h = Harness::new();
    h.transcribe.fail_always(transient());

    let video_id = h.controller.submit("BV1budget").await.unwrap();
    let job = h.controller.wait(&video_id).await.unwrap();

    assert_eq!(job.stage, Stage::Failed);
    assert_eq!(h.transcribe.calls(), 3);
    assert_eq!(job.attempts_for(Stage::Transcribing), 3);
    assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::TransientServiceError);

    let times = h.transcribe.call_times();
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps.len(), 2);
    assert!(gaps[0] >= Duration::from_secs(1) && gaps[0] < Duration::from_millis(1100));
    assert!(gaps[1] >= Duration::from_secs(2) && gaps[1] < Duration::from_millis(2100));

    let delays: Vec<u64> = job
        .decisions
        .iter()
        .filter(|d| d.decision == DecisionKind::Retry)
        .filter_map(|d| d.delay_ms)
        .collect();
    assert_eq!(delays, vec![1000, 2000]);
    assert_eq!(job.decisions.last().unwrap().decision, DecisionKind::Fail);
}

#[tokio::test]
async fn concurrent_submissions_share_one_job() {
    let h = Harness::new();
    let gate = h.download.close_gate();

    let (a, b) = tokio::join!(
        h.controller.submit("BV1dup"),
        h.controller.submit("https://www.bilibili.com/video/BV1dup/")
    );
    let video_id = a.unwrap();
    assert_eq!(b.unwrap(), video_id);

    h.download.wait_entered().await;
    assert!(h.controller.is_running(&video_id).await);
    assert_eq!(h.controller.submit("BV1dup").await.unwrap(), video_id);

    gate.add_permits(10);
    let job = h.controller.wait(&video_id).await.unwrap();
    assert_eq!(job.stage, Stage::Completed);
    assert_eq!(h.download.calls(), 1);
    assert_eq!(h.transcribe.calls(), 1);
    assert_eq!(h.controller.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn resubmitting_a_completed_job_does_no_work() {
    let h = Harness::new();
    let video_id = h.controller.submit("BV1done").await.unwrap();
    h.controller.wait(&video_id).await.unwrap();

    let again = h.controller.submit("BV1done").await.unwrap();
    let job = h.controller.wait(&again).await.unwrap();

    assert_eq!(job.stage, Stage::Completed);
    assert_eq!(h.download.calls(), 1);
    assert_eq!(h.mindmap.calls(), 1);
}

#[tokio::test]
async fn resume_interrupted_skips_finished_stages() {
    let h = Harness::new();
    let now = Utc::now();

    // A job interrupted while summarizing.
    let interrupted = VideoId::new("BV1crash");
    let mut job = h.jobs.get_or_create(&interrupted, "BV1crash", now).await.unwrap();
    for (kind, content) in [
        (ArtifactKind::Audio, b"audio".to_vec()),
        (
            ArtifactKind::Transcript,
            br#"{"text":"hello","source":"speech"}"#.to_vec(),
        ),
    ] {
        let reference = h.artifacts.put(&interrupted, kind, content, now).await.unwrap();
        job.artifacts.insert(kind, reference);
    }
    job.stage = Stage::Summarizing;
    h.jobs.save(&job).await.unwrap();

    // One with a persisted cancel request, one halted, one finished.
    let cancelled = VideoId::new("BV1cancel");
    let mut job = h.jobs.get_or_create(&cancelled, "BV1cancel", now).await.unwrap();
    job.stage = Stage::Transcribing;
    job.cancel_requested = true;
    h.jobs.save(&job).await.unwrap();

    let halted = VideoId::new("BV1halt");
    let mut job = h.jobs.get_or_create(&halted, "BV1halt", now).await.unwrap();
    job.stage = Stage::Downloading;
    job.error = Some(vidnote_core::domain::JobError {
        kind: ErrorKind::StorageError,
        stage: Stage::Downloading,
        message: "disk full".into(),
        retryable: true,
    });
    h.jobs.save(&job).await.unwrap();

    let finished = VideoId::new("BV1fin");
    let mut job = h.jobs.get_or_create(&finished, "BV1fin", now).await.unwrap();
    job.stage = Stage::Completed;
    h.jobs.save(&job).await.unwrap();

    let controller = h.rebuild();
    let mut resumed = controller.resume_interrupted().await.unwrap();
    resumed.sort();
    assert_eq!(resumed, vec![cancelled.clone(), interrupted.clone()]);

    let job = controller.wait(&interrupted).await.unwrap();
    assert_eq!(job.stage, Stage::Completed);
    assert_eq!(h.download.calls(), 0);
    assert_eq!(h.transcribe.calls(), 0);
    assert_eq!(h.summarize.calls(), 1);
    assert_eq!(h.mindmap.calls(), 1);

    let job = controller.wait(&cancelled).await.unwrap();
    assert_eq!(job.stage, Stage::Cancelled);

    let job = controller.get_status(&halted).await.unwrap();
    assert_eq!(job.stage, Stage::Downloading);
    assert!(!controller.is_running(&halted).await);
}

#[tokio::test]
async fn restarting_a_stage_with_identical_output_keeps_the_reference() {
    let h = Harness::new();
    let video_id = h.controller.submit("BV1same").await.unwrap();
    let first = h.controller.wait(&video_id).await.unwrap();
    let summary = first.artifact(ArtifactKind::Summary).cloned().unwrap();

    h.controller
        .restart_from(&video_id, Stage::Summarizing)
        .await
        .unwrap();
    let second = h.controller.wait(&video_id).await.unwrap();

    assert_eq!(second.stage, Stage::Completed);
    assert_eq!(second.artifact(ArtifactKind::Summary), Some(&summary));
    assert_eq!(h.summarize.calls(), 2);
    assert_eq!(h.mindmap.calls(), 2);
    assert_eq!(h.download.calls(), 1);
    assert_eq!(h.transcribe.calls(), 1);
    assert_eq!(h.artifacts.blob_count(&video_id, ArtifactKind::Summary).await, 1);
}

#[tokio::test]
async fn full_restart_reruns_everything_and_retains_versions() {
    let mut config = test_config();
    config.retain_artifact_versions = true;
    let counter = Arc::new(AtomicU32::new(0));
    let h = Harness::with_downloader(config, move |input: &StageInput| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        StageOutput::single(
            ArtifactKind::Audio,
            format!("audio:{}:{n}", input.source_ref()).into_bytes(),
        )
        .with_media(common::media())
    });

    let video_id = h.controller.submit("BV1again").await.unwrap();
    h.controller.wait(&video_id).await.unwrap();

    let err = h.controller.retry(&video_id, true).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition { .. }));

    let job = h.controller.retry(&video_id, false).await.unwrap();
    assert_eq!(job.stage, Stage::Queued);
    assert!(job.artifacts.is_empty());
    let job = h.controller.wait(&video_id).await.unwrap();

    assert_eq!(job.stage, Stage::Completed);
    assert_eq!(h.download.calls(), 2);
    assert_eq!(h.mindmap.calls(), 2);
    assert_eq!(job.artifact(ArtifactKind::Audio).unwrap().version, 2);
    let versions = h
        .artifacts
        .versions(&video_id, ArtifactKind::Audio)
        .await
        .unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version, 1);
}

#[tokio::test(start_paused = true)]
async fn retry_from_failed_stage_keeps_earlier_outputs() {
    let h = Harness::new();
    h.transcribe.fail_always(transient());
    let video_id = h.controller.submit("BV1resume").await.unwrap();
    let job = h.controller.wait(&video_id).await.unwrap();
    assert_eq!(job.stage, Stage::Failed);

    h.transcribe.stop_failing();
    let job = h.controller.retry(&video_id, true).await.unwrap();
    assert_eq!(job.stage, Stage::Transcribing);
    assert_eq!(job.attempts_for(Stage::Transcribing), 0);

    let job = h.controller.wait(&video_id).await.unwrap();
    assert_eq!(job.stage, Stage::Completed);
    assert_eq!(job.attempts_for(Stage::Transcribing), 1);
    assert_eq!(h.download.calls(), 1);
    assert_eq!(h.transcribe.calls(), 4);
}

#[tokio::test]
async fn cancel_stops_at_the_next_stage_boundary() {
    let h = Harness::new();
    let gate = h.transcribe.close_gate();
    let mut events = h.controller.subscribe();

    let video_id = h.controller.submit("BV1stop").await.unwrap();
    h.transcribe.wait_entered().await;

    let job = h.controller.cancel(&video_id).await.unwrap();
    assert_eq!(job.stage, Stage::Transcribing);

    gate.add_permits(1);
    let job = h.controller.wait(&video_id).await.unwrap();

    assert_eq!(job.stage, Stage::Cancelled);
    assert!(job.artifact(ArtifactKind::Audio).is_some());
    assert!(job.artifact(ArtifactKind::Transcript).is_some());
    assert_eq!(h.summarize.calls(), 0);
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        JobEvent::Cancelled {
            stage: Stage::Summarizing,
            ..
        }
    )));

    // Cancelling again is a no-op; a cancelled job can be resumed.
    assert_eq!(
        h.controller.cancel(&video_id).await.unwrap().stage,
        Stage::Cancelled
    );
    h.controller.retry(&video_id, true).await.unwrap();
    let job = h.controller.wait(&video_id).await.unwrap();
    assert_eq!(job.stage, Stage::Completed);
    assert_eq!(h.transcribe.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_backoff() {
    let h = Harness::new();
    h.transcribe.fail_always(transient());
    let mut events = h.controller.subscribe();

    let video_id = h.controller.submit("BV1wait").await.unwrap();
    loop {
        if let JobEvent::RetryScheduled { .. } = events.recv().await.unwrap() {
            break;
        }
    }
    h.controller.cancel(&video_id).await.unwrap();
    let job = h.controller.wait(&video_id).await.unwrap();

    assert_eq!(job.stage, Stage::Cancelled);
    assert_eq!(h.transcribe.calls(), 1);
}

#[tokio::test]
async fn cancel_refuses_finished_jobs() {
    let h = Harness::new();
    let video_id = h.controller.submit("BV1end").await.unwrap();
    h.controller.wait(&video_id).await.unwrap();

    let err = h.controller.cancel(&video_id).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition { .. }));
    assert_eq!(err.kind(), ErrorKind::InputError);
}

#[tokio::test]
async fn step_mode_pauses_after_each_executed_stage() {
    let mut config = test_config();
    config.step_mode = StepMode::Pause;
    let h = Harness::with_config(config);
    let mut events = h.controller.subscribe();

    let video_id = h.controller.submit("BV1step").await.unwrap();
    let job = h.controller.wait(&video_id).await.unwrap();
    assert_eq!(job.stage, Stage::Transcribing);
    assert!(!h.controller.is_running(&video_id).await);
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        JobEvent::Paused {
            next_stage: Stage::Transcribing,
            ..
        }
    )));

    for expected in [Stage::Summarizing, Stage::GeneratingMindmap, Stage::Completed] {
        h.controller.advance(&video_id).await.unwrap();
        let job = h.controller.wait(&video_id).await.unwrap();
        assert_eq!(job.stage, expected);
    }
    assert_eq!(h.transcribe.calls(), 1);

    let err = h.controller.advance(&video_id).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition { .. }));
}

#[tokio::test]
async fn paused_job_can_be_cancelled_directly() {
    let mut config = test_config();
    config.step_mode = StepMode::Pause;
    let h = Harness::with_config(config);

    let video_id = h.controller.submit("BV1idle").await.unwrap();
    h.controller.wait(&video_id).await.unwrap();

    let job = h.controller.cancel(&video_id).await.unwrap();
    assert_eq!(job.stage, Stage::Cancelled);
    assert!(job.artifact(ArtifactKind::Audio).is_some());
}

#[tokio::test]
async fn cancel_while_the_driver_announces_a_pause_is_kept() {
    let mut config = test_config();
    config.step_mode = StepMode::Pause;
    let gate = PauseGate::new();
    let h = Harness::with_sink(config, gate.clone());

    let video_id = h.controller.submit("BV1race").await.unwrap();
    // The driver now holds the video lock inside its Paused emit.
    gate.entered.acquire().await.unwrap().forget();
    assert!(h.controller.is_running(&video_id).await);

    h.controller.cancel(&video_id).await.unwrap();
    gate.release.add_permits(1);

    let job = h.controller.wait(&video_id).await.unwrap();
    assert_eq!(job.stage, Stage::Cancelled);
    assert!(job.cancel_requested);
    assert!(!h.controller.is_running(&video_id).await);

    let err = h.controller.advance(&video_id).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition { .. }));
    assert_eq!(h.transcribe.calls(), 0);
}

#[tokio::test]
async fn panicking_executor_fails_the_job() {
    let h = Harness::with_downloader(test_config(), |_: &StageInput| -> StageOutput {
        panic!("executor bug")
    });

    let video_id = h.controller.submit("BV9").await.unwrap();
    let job = h.controller.wait(&video_id).await.unwrap();

    assert_eq!(job.stage, Stage::Failed);
    assert!(!h.controller.is_running(&video_id).await);
    let error = job.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::PermanentServiceError);
    assert_eq!(error.stage, Stage::Downloading);
    assert!(!error.retryable);
    assert!(error.message.contains("executor bug"));
    assert_eq!(h.download.calls(), 1);

    // The job is not wedged: retry runs the stage again.
    h.controller.retry(&video_id, true).await.unwrap();
    let job = h.controller.wait(&video_id).await.unwrap();
    assert_eq!(job.stage, Stage::Failed);
    assert_eq!(h.download.calls(), 2);
}

#[tokio::test]
async fn scratch_directories_are_removed_after_each_attempt() {
    let h = Harness::new();
    h.summarize
        .fail_next([StageError::UnsupportedAudio("scratch check".into())]);

    let video_id = h.controller.submit("BV1tmp").await.unwrap();
    let job = h.controller.wait(&video_id).await.unwrap();
    assert_eq!(job.stage, Stage::Failed);

    h.controller.retry(&video_id, true).await.unwrap();
    h.controller.wait(&video_id).await.unwrap();

    let dirs: Vec<_> = [&h.download, &h.transcribe, &h.summarize, &h.mindmap]
        .iter()
        .flat_map(|e| e.scratch_dirs())
        .collect();
    assert_eq!(dirs.len(), 5);
    for (path, existed) in &dirs {
        assert!(existed, "{} missing during the attempt", path.display());
        assert!(!path.exists(), "{} left behind", path.display());
    }
    assert_eq!(h.scratch_entries(), 0);
}

#[tokio::test]
async fn storage_failure_halts_until_retried() {
    let h = Harness::new();
    h.artifacts.set_fail_writes(true);
    let mut events = h.controller.subscribe();

    let video_id = h.controller.submit("BV1disk").await.unwrap();
    let job = h.controller.wait(&video_id).await.unwrap();

    assert_eq!(job.stage, Stage::Downloading);
    let error = job.error.clone().unwrap();
    assert_eq!(error.kind, ErrorKind::StorageError);
    assert!(error.retryable);
    assert_eq!(h.download.calls(), 1);
    assert!(job.artifacts.is_empty());
    assert!(!h.controller.is_running(&video_id).await);
    assert!(drain(&mut events).iter().any(|e| matches!(e, JobEvent::Halted { .. })));
    assert!(h.controller.status(&video_id).await.unwrap().retry_possible);

    h.artifacts.set_fail_writes(false);
    h.controller.retry(&video_id, true).await.unwrap();
    let job = h.controller.wait(&video_id).await.unwrap();
    assert_eq!(job.stage, Stage::Completed);
    assert_eq!(h.download.calls(), 2);
}

#[tokio::test]
async fn corrupt_input_artifact_halts_the_job() {
    let h = Harness::new();
    let gate = h.transcribe.close_gate();
    let video_id = h.controller.submit("BV1rot").await.unwrap();
    h.transcribe.wait_entered().await;

    let job = h.controller.get_status(&video_id).await.unwrap();
    let audio = job.artifact(ArtifactKind::Audio).cloned().unwrap();
    h.artifacts.tamper(&audio, b"garbage".to_vec()).await;

    // Fail the transcription so the audio is read again on restart.
    h.transcribe.fail_next([StageError::UnsupportedAudio("codec".into())]);
    gate.add_permits(10);
    let job = h.controller.wait(&video_id).await.unwrap();
    assert_eq!(job.stage, Stage::Failed);

    h.controller.retry(&video_id, true).await.unwrap();
    let job = h.controller.wait(&video_id).await.unwrap();
    assert_eq!(job.stage, Stage::Transcribing);
    let error = job.error.unwrap();
    assert_eq!(error.kind, ErrorKind::StorageError);
    assert!(!error.retryable);
}

#[tokio::test]
async fn subtitles_make_transcription_unnecessary() {
    let h = Harness::with_downloader(test_config(), subtitle_output);
    let mut events = h.controller.subscribe();

    let video_id = h.controller.submit("BV1subs").await.unwrap();
    let job = h.controller.wait(&video_id).await.unwrap();

    assert_eq!(job.stage, Stage::Completed);
    assert_eq!(h.transcribe.calls(), 0);
    assert!(job.artifact(ArtifactKind::Audio).is_none());
    assert!(job.artifact(ArtifactKind::Transcript).is_some());
    assert_eq!(job.media.as_ref().unwrap().title, "Test video");

    let visited: Vec<(Stage, bool)> = drain(&mut events)
        .iter()
        .filter_map(|e| match e {
            JobEvent::StageStarted { stage, .. } => Some((*stage, true)),
            JobEvent::StageSkipped { stage, .. } => Some((*stage, false)),
            _ => None,
        })
        .collect();
    assert_eq!(
        visited,
        vec![
            (Stage::Downloading, true),
            (Stage::Transcribing, false),
            (Stage::Summarizing, true),
            (Stage::GeneratingMindmap, true),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn stage_timeout_is_retried() {
    let mut config = test_config();
    config.timeouts.transcribe_secs = 1;
    let h = Harness::with_config(config);
    h.transcribe.delay_next(Duration::from_secs(10));

    let video_id = h.controller.submit("BV1slow").await.unwrap();
    let job = h.controller.wait(&video_id).await.unwrap();

    assert_eq!(job.stage, Stage::Completed);
    assert_eq!(job.attempts_for(Stage::Transcribing), 2);
    let first = job
        .attempts
        .iter()
        .find(|a| a.stage == Stage::Transcribing)
        .unwrap();
    assert!(!first.succeeded());
}

#[tokio::test]
async fn caller_errors_are_typed() {
    let h = Harness::new();

    let err = h.controller.submit("   ").await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidReference(_)));

    let unknown = VideoId::new("BV1none");
    let err = h.controller.get_status(&unknown).await.unwrap_err();
    assert!(matches!(err, PipelineError::JobNotFound(_)));

    let gate = h.download.close_gate();
    let video_id = h.controller.submit("BV1busy").await.unwrap();
    h.download.wait_entered().await;
    let err = h.controller.retry(&video_id, true).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition { .. }));
    let err = h
        .controller
        .restart_from(&video_id, Stage::Downloading)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition { .. }));
    gate.add_permits(10);
    h.controller.wait(&video_id).await.unwrap();
}

#[tokio::test]
async fn counts_group_jobs_by_stage() {
    let h = Harness::new();
    h.download
        .fail_next([StageError::InvalidReference("nope".into())]);

    let failed = h.controller.submit("not-a-video").await.unwrap();
    h.controller.wait(&failed).await.unwrap();
    let done = h.controller.submit("BV1ok").await.unwrap();
    h.controller.wait(&done).await.unwrap();

    let counts = h.controller.counts().await.unwrap();
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.total(), 2);
    assert_eq!(counts.running, 0);
}
