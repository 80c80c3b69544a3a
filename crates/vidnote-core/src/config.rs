//! Configuration: optional TOML file, then environment overrides.
//!
//! ```toml
//! data_dir = "/var/lib/vidnote"
//!
//! [pipeline]
//! max_attempts = 3
//! backoff_base_ms = 1000
//! step_mode = "pause"
//!
//! [services]
//! whisper_api_url = "http://localhost:8000"
//! llm_model = "gpt-4o-mini"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{RetryPolicy, Stage};
use crate::executors::SummarizerOptions;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} for {var}: {message}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("no language model API key configured (set LLM_API_KEY)")]
    MissingApiKey,
}

/// Whether the driver continues after each stage or waits for `advance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMode {
    #[default]
    Continuous,
    Pause,
}

/// Per-stage bound on one executor call, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTimeouts {
    pub download_secs: u64,
    pub transcribe_secs: u64,
    pub summarize_secs: u64,
    pub mindmap_secs: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            download_secs: 30 * 60,
            transcribe_secs: 60 * 60,
            summarize_secs: 10 * 60,
            mindmap_secs: 10 * 60,
        }
    }
}

impl StageTimeouts {
    pub fn for_stage(&self, stage: Stage) -> Duration {
        let secs = match stage {
            Stage::Downloading => self.download_secs,
            Stage::Transcribing => self.transcribe_secs,
            Stage::Summarizing => self.summarize_secs,
            Stage::GeneratingMindmap => self.mindmap_secs,
            _ => 0,
        };
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    pub step_mode: StepMode,
    pub retain_artifact_versions: bool,
    pub timeouts: StageTimeouts,
    /// Capacity of the event broadcast channel.
    pub event_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_multiplier: 2.0,
            step_mode: StepMode::Continuous,
            retain_artifact_versions: false,
            timeouts: StageTimeouts::default(),
            event_buffer: 256,
        }
    }
}

impl PipelineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            multiplier: self.backoff_multiplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub fetcher_program: String,
    pub subtitle_langs: Vec<String>,
    pub whisper_api_url: String,
    pub transcribe_language: Option<String>,
    pub transcribe_timestamps: bool,
    pub llm_api_base: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    /// Rough token budget; two characters per token.
    pub max_input_tokens: usize,
    pub truncate_long_input: bool,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            fetcher_program: "yt-dlp".into(),
            subtitle_langs: ["zh-Hans", "zh-CN", "zh", "en"].map(String::from).to_vec(),
            whisper_api_url: "http://localhost:8000".into(),
            transcribe_language: None,
            transcribe_timestamps: true,
            llm_api_base: "https://api.openai.com/v1".into(),
            llm_api_key: None,
            llm_model: "gpt-4o-mini".into(),
            max_input_tokens: 8_000,
            truncate_long_input: true,
            temperature: 0.7,
            max_output_tokens: 8_000,
        }
    }
}

impl ServicesConfig {
    pub fn max_input_chars(&self) -> usize {
        self.max_input_tokens.saturating_mul(2)
    }

    pub fn summarizer_options(&self) -> SummarizerOptions {
        SummarizerOptions {
            max_input_chars: self.max_input_chars(),
            truncate_long_input: self.truncate_long_input,
            temperature: self.temperature,
            max_tokens: self.max_output_tokens,
        }
    }

    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.llm_api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    /// Root for per-attempt scratch directories. Defaults to `<data_dir>/scratch`.
    pub scratch_dir: Option<PathBuf>,
    pub pipeline: PipelineConfig,
    pub services: ServicesConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("vidnote-data"),
            scratch_dir: None,
            pipeline: PipelineConfig::default(),
            services: ServicesConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `path` (when given), apply process environment, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                        path: path.to_path_buf(),
                        source,
                    })?;
                toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (the process environment in `load`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("VIDNOTE_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("VIDNOTE_SCRATCH_DIR") {
            self.scratch_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("LLM_API_KEY") {
            self.services.llm_api_key = Some(v);
        }
        if let Some(v) = lookup("LLM_API_BASE") {
            self.services.llm_api_base = v;
        }
        if let Some(v) = lookup("LLM_MODEL") {
            self.services.llm_model = v;
        }
        if let Some(v) = lookup("WHISPER_API_URL") {
            self.services.whisper_api_url = v;
        }
        if let Some(v) = lookup("TRANSCRIBE_LANGUAGE") {
            self.services.transcribe_language = Some(v).filter(|l| !l.trim().is_empty());
        }
        if let Some(v) = lookup("MAX_INPUT_TOKENS") {
            self.services.max_input_tokens =
                v.trim().parse().map_err(|e: std::num::ParseIntError| {
                    ConfigError::InvalidEnv {
                        var: "MAX_INPUT_TOKENS",
                        value: v.clone(),
                        message: e.to_string(),
                    }
                })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.max_attempts == 0 {
            return Err(ConfigError::Invalid("pipeline.max_attempts must be at least 1".into()));
        }
        let multiplier = self.pipeline.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "pipeline.backoff_multiplier must be >= 1.0".into(),
            ));
        }
        if self.services.max_input_tokens == 0 {
            return Err(ConfigError::Invalid("services.max_input_tokens must be positive".into()));
        }
        if self.pipeline.event_buffer == 0 {
            return Err(ConfigError::Invalid("pipeline.event_buffer must be positive".into()));
        }
        Ok(())
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    pub fn notes_dir(&self) -> PathBuf {
        self.data_dir.join("notes")
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("scratch"))
    }
}
