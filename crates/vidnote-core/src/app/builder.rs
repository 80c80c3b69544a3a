//! PipelineBuilder: wiring and start-up validation.
//!
//! `build()` fails fast: a controller never starts with a stage that has no
//! executor or without its stores.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};

use super::controller::{DriverSettings, Inner, PipelineController};
use super::locks::KeyedLocks;
use super::registry::{ExecutorRegistry, RegistryError};
use crate::config::{AppConfig, ConfigError, PipelineConfig};
use crate::domain::{Decider, DefaultDecider, Stage};
use crate::executors::{Downloader, MindmapGenerator, Summarizer, Transcriber};
use crate::impls::{FsArtifactStore, FsJobStore};
use crate::notes::NoteExportSink;
use crate::ports::{
    ArtifactStore, Clock, EventSink, IdGenerator, JobStore, NoopEventSink, StageExecutor,
    SystemClock, UlidGenerator,
};
use crate::services::{
    HttpTranscriptionService, LanguageModel, OpenAiCompatibleModel, YtDlpFetcher,
};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing executors for stages: {0:?}")]
    MissingExecutors(Vec<Stage>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("no {0} store configured")]
    MissingStore(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Builds a [`PipelineController`].
///
/// ```ignore
/// let controller = PipelineBuilder::new()
///     .job_store(Arc::new(InMemoryJobStore::new()))
///     .artifact_store(Arc::new(InMemoryArtifactStore::new()))
///     .executor(Arc::new(Downloader::new(fetcher)))
///     // ... one executor per stage
///     .build()?;
/// ```
pub struct PipelineBuilder {
    jobs: Option<Arc<dyn JobStore>>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    executors: Vec<Arc<dyn StageExecutor>>,
    decider: Option<Arc<dyn Decider>>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    sink: Arc<dyn EventSink>,
    config: PipelineConfig,
    scratch_root: PathBuf,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            jobs: None,
            artifacts: None,
            executors: Vec::new(),
            decider: None,
            clock: Arc::new(SystemClock),
            ids: None,
            sink: Arc::new(NoopEventSink),
            config: PipelineConfig::default(),
            scratch_root: std::env::temp_dir().join("vidnote-scratch"),
        }
    }

    /// Production wiring: filesystem stores under `data_dir`, yt-dlp, the
    /// HTTP transcription service, an OpenAI-compatible model, and note
    /// export into `<data_dir>/notes`.
    pub fn from_config(config: &AppConfig) -> Result<Self, BuildError> {
        config.validate()?;
        let services = &config.services;
        let api_key = services.require_api_key()?;

        let artifacts: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(
            config.artifacts_dir(),
            config.pipeline.retain_artifact_versions,
        ));
        let fetcher = Arc::new(YtDlpFetcher::new(
            services.fetcher_program.clone(),
            services.subtitle_langs.clone(),
        ));
        let transcription = Arc::new(HttpTranscriptionService::new(
            services.whisper_api_url.clone(),
        ));
        let model: Arc<dyn LanguageModel> = Arc::new(OpenAiCompatibleModel::new(
            services.llm_api_base.clone(),
            api_key,
            services.llm_model.clone(),
        ));
        let options = services.summarizer_options();

        Ok(Self::new()
            .job_store(Arc::new(FsJobStore::new(config.jobs_dir())))
            .artifact_store(Arc::clone(&artifacts))
            .executor(Arc::new(Downloader::new(fetcher)))
            .executor(Arc::new(
                Transcriber::new(transcription)
                    .with_language(services.transcribe_language.clone())
                    .with_timestamps(services.transcribe_timestamps),
            ))
            .executor(Arc::new(Summarizer::new(Arc::clone(&model), options.clone())))
            .executor(Arc::new(MindmapGenerator::new(model, options)))
            .event_sink(Arc::new(NoteExportSink::new(artifacts, config.notes_dir())))
            .pipeline_config(config.pipeline.clone())
            .scratch_root(config.scratch_root()))
    }

    pub fn job_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.jobs = Some(store);
        self
    }

    pub fn artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(store);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        self.executors.push(executor);
        self
    }

    /// Replaces the default decider built from the pipeline config.
    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    /// - `Registry`: two executors for one stage, or one for a non-executable stage
    /// - `MissingExecutors`: an executable stage without an executor
    /// - `MissingStore`: no job or artifact store
    /// - `Config`: invalid retry settings
    pub fn build(self) -> Result<PipelineController, BuildError> {
        let mut registry = ExecutorRegistry::new();
        for executor in self.executors {
            registry.register(executor)?;
        }
        let missing = registry.missing();
        if !missing.is_empty() {
            return Err(BuildError::MissingExecutors(missing));
        }

        let jobs = self.jobs.ok_or(BuildError::MissingStore("job"))?;
        let artifacts = self.artifacts.ok_or(BuildError::MissingStore("artifact"))?;

        if self.config.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()).into());
        }
        if self.config.event_buffer == 0 {
            return Err(ConfigError::Invalid("event_buffer must be positive".into()).into());
        }

        let decider = self.decider.unwrap_or_else(|| {
            Arc::new(DefaultDecider::new(self.config.retry_policy())) as Arc<dyn Decider>
        });
        let ids = self.ids.unwrap_or_else(|| {
            Arc::new(UlidGenerator::new(Arc::clone(&self.clock))) as Arc<dyn IdGenerator>
        });
        let (events, _) = broadcast::channel(self.config.event_buffer);

        Ok(PipelineController::from_inner(Inner {
            jobs,
            artifacts,
            executors: registry,
            decider,
            clock: self.clock,
            ids,
            sink: self.sink,
            settings: DriverSettings {
                step_mode: self.config.step_mode,
                timeouts: self.config.timeouts,
                scratch_root: self.scratch_root,
            },
            locks: KeyedLocks::new(),
            drivers: Mutex::new(HashMap::new()),
            events,
        }))
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
