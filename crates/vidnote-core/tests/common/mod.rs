//! Shared harness: scripted executors over in-memory stores.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, broadcast};
use tokio::time::Instant;

use vidnote_core::config::{PipelineConfig, StageTimeouts};
use vidnote_core::domain::{
    ArtifactKind, Job, JobEvent, MediaInfo, MindmapDocument, MindmapNode, Stage, StageError,
    SummaryDocument, Transcript, TranscriptSource,
};
use vidnote_core::impls::{InMemoryArtifactStore, InMemoryJobStore};
use vidnote_core::ports::{
    ArtifactStore, EventSink, EventSinkError, JobStore, NoopEventSink, StageExecutor, StageInput,
    StageOutput,
};
use vidnote_core::{PipelineBuilder, PipelineController};

type OutputFn = dyn Fn(&StageInput) -> StageOutput + Send + Sync;

/// Executor with a call counter, scripted failures and an optional gate.
pub struct MockExecutor {
    stage: Stage,
    calls: AtomicU32,
    failures: Mutex<VecDeque<StageError>>,
    always_fail: Mutex<Option<StageError>>,
    delays: Mutex<VecDeque<Duration>>,
    output: Box<OutputFn>,
    call_times: Mutex<Vec<Instant>>,
    scratch_dirs: Mutex<Vec<(PathBuf, bool)>>,
    /// Signalled when a call starts.
    pub entered: Semaphore,
    /// Calls wait for a permit when gated.
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockExecutor {
    pub fn new(stage: Stage, output: impl Fn(&StageInput) -> StageOutput + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            stage,
            calls: AtomicU32::new(0),
            failures: Mutex::new(VecDeque::new()),
            always_fail: Mutex::new(None),
            delays: Mutex::new(VecDeque::new()),
            output: Box::new(output),
            call_times: Mutex::new(Vec::new()),
            scratch_dirs: Mutex::new(Vec::new()),
            entered: Semaphore::new(0),
            gate: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fail the next calls with these errors, in order.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = StageError>) {
        self.failures.lock().unwrap().extend(errors);
    }

    pub fn fail_always(&self, error: StageError) {
        *self.always_fail.lock().unwrap() = Some(error);
    }

    pub fn stop_failing(&self) {
        *self.always_fail.lock().unwrap() = None;
    }

    /// Sleep before answering the next call.
    pub fn delay_next(&self, delay: Duration) {
        self.delays.lock().unwrap().push_back(delay);
    }

    /// Gate calls: each permit added to the returned semaphore lets one through.
    pub fn close_gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub async fn wait_entered(&self) {
        self.entered.acquire().await.unwrap().forget();
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    /// Scratch directories seen, with whether they existed during the call.
    pub fn scratch_dirs(&self) -> Vec<(PathBuf, bool)> {
        self.scratch_dirs.lock().unwrap().clone()
    }
}

#[async_trait]
impl StageExecutor for MockExecutor {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn execute(&self, input: StageInput) -> Result<StageOutput, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        self.scratch_dirs
            .lock()
            .unwrap()
            .push((input.scratch_dir.clone(), input.scratch_dir.is_dir()));
        self.entered.add_permits(1);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        let delay = self.delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        if let Some(err) = self.always_fail.lock().unwrap().clone() {
            return Err(err);
        }
        Ok((self.output)(&input))
    }
}

/// Sink that holds the driver inside its `Paused` emit until released.
pub struct PauseGate {
    pub entered: Semaphore,
    pub release: Semaphore,
}

impl PauseGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Semaphore::new(0),
            release: Semaphore::new(0),
        })
    }
}

#[async_trait]
impl EventSink for PauseGate {
    async fn emit(&self, event: &JobEvent, _job: &Job) -> Result<(), EventSinkError> {
        if matches!(event, JobEvent::Paused { .. }) {
            self.entered.add_permits(1);
            self.release.acquire().await.unwrap().forget();
        }
        Ok(())
    }
}

pub fn media() -> MediaInfo {
    MediaInfo {
        title: "Test video".into(),
        duration_secs: 120.0,
    }
}

pub fn audio_output(input: &StageInput) -> StageOutput {
    StageOutput::single(ArtifactKind::Audio, format!("audio:{}", input.source_ref()).into_bytes())
        .with_media(media())
}

pub fn subtitle_output(_: &StageInput) -> StageOutput {
    let transcript = Transcript::from_subtitles("subtitle text");
    StageOutput::json(ArtifactKind::Transcript, &transcript)
        .unwrap()
        .with_media(media())
}

pub fn transcript_output(_: &StageInput) -> StageOutput {
    let transcript = Transcript {
        text: "hello world".into(),
        segments: Vec::new(),
        source: TranscriptSource::Speech,
        language: Some("en".into()),
    };
    StageOutput::json(ArtifactKind::Transcript, &transcript).unwrap()
}

pub fn summary_output(_: &StageInput) -> StageOutput {
    let summary = SummaryDocument {
        summary: "A short summary.".into(),
        outline: "- Topic\n  - Point".into(),
        truncated_input: false,
    };
    StageOutput::json(ArtifactKind::Summary, &summary).unwrap()
}

pub fn mindmap_output(_: &StageInput) -> StageOutput {
    let mindmap = MindmapDocument {
        title: "Test video".into(),
        markdown: "- Topic\n  - Point".into(),
        root: MindmapNode {
            text: "Topic".into(),
            children: vec![MindmapNode::leaf("Point")],
        },
    };
    StageOutput::json(ArtifactKind::Mindmap, &mindmap).unwrap()
}

/// No per-stage timeouts, so gated executors never time out under paused time.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        timeouts: StageTimeouts {
            download_secs: 0,
            transcribe_secs: 0,
            summarize_secs: 0,
            mindmap_secs: 0,
        },
        ..PipelineConfig::default()
    }
}

pub struct Harness {
    pub controller: PipelineController,
    pub jobs: Arc<InMemoryJobStore>,
    pub artifacts: Arc<InMemoryArtifactStore>,
    pub download: Arc<MockExecutor>,
    pub transcribe: Arc<MockExecutor>,
    pub summarize: Arc<MockExecutor>,
    pub mindmap: Arc<MockExecutor>,
    pub config: PipelineConfig,
    pub sink: Arc<dyn EventSink>,
    pub scratch: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        Self::with_downloader(config, audio_output)
    }

    pub fn with_downloader(
        config: PipelineConfig,
        download: impl Fn(&StageInput) -> StageOutput + Send + Sync + 'static,
    ) -> Self {
        Self::assemble(config, download, Arc::new(NoopEventSink))
    }

    pub fn with_sink(config: PipelineConfig, sink: Arc<dyn EventSink>) -> Self {
        Self::assemble(config, audio_output, sink)
    }

    fn assemble(
        config: PipelineConfig,
        download: impl Fn(&StageInput) -> StageOutput + Send + Sync + 'static,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let jobs = Arc::new(InMemoryJobStore::new());
        let artifacts = Arc::new(InMemoryArtifactStore::with_retention(config.retain_artifact_versions));
        let download = MockExecutor::new(Stage::Downloading, download);
        let transcribe = MockExecutor::new(Stage::Transcribing, transcript_output);
        let summarize = MockExecutor::new(Stage::Summarizing, summary_output);
        let mindmap = MockExecutor::new(Stage::GeneratingMindmap, mindmap_output);
        let scratch = tempfile::tempdir().unwrap();
        let controller = build_controller(
            &jobs,
            &artifacts,
            [&download, &transcribe, &summarize, &mindmap],
            &config,
            &sink,
            scratch.path().join("work"),
        );

        Self {
            controller,
            jobs,
            artifacts,
            download,
            transcribe,
            summarize,
            mindmap,
            config,
            sink,
            scratch,
        }
    }

    /// A fresh controller over the same stores and executors, as after a restart.
    pub fn rebuild(&self) -> PipelineController {
        build_controller(
            &self.jobs,
            &self.artifacts,
            [&self.download, &self.transcribe, &self.summarize, &self.mindmap],
            &self.config,
            &self.sink,
            self.scratch.path().join("work"),
        )
    }

    pub fn scratch_entries(&self) -> usize {
        match std::fs::read_dir(self.scratch.path().join("work")) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

fn build_controller(
    jobs: &Arc<InMemoryJobStore>,
    artifacts: &Arc<InMemoryArtifactStore>,
    executors: [&Arc<MockExecutor>; 4],
    config: &PipelineConfig,
    sink: &Arc<dyn EventSink>,
    scratch_root: PathBuf,
) -> PipelineController {
    let jobs: Arc<dyn JobStore> = jobs.clone();
    let artifacts: Arc<dyn ArtifactStore> = artifacts.clone();
    executors
        .into_iter()
        .fold(
            PipelineBuilder::new().job_store(jobs).artifact_store(artifacts),
            |builder, executor| builder.executor(executor.clone()),
        )
        .pipeline_config(config.clone())
        .event_sink(Arc::clone(sink))
        .scratch_root(scratch_root)
        .build()
        .unwrap()
}

/// Events already published.
pub fn drain(rx: &mut broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn transient() -> StageError {
    StageError::TranscriptionServiceUnavailable("503 from stt".into())
}
