//! vidnote-core
//!
//! Turns a video reference into a note: audio, transcript, summary and a
//! mind map, produced by a resumable, retrying pipeline.
//!
//! # Modules
//! - **domain**: job record, stages, artifacts, errors, events, retry decisions
//! - **ports**: store, executor, clock, id and event sink traits
//! - **impls**: in-memory and filesystem stores
//! - **services**: media fetcher, speech-to-text and language model adapters
//! - **executors**: one stage executor per pipeline stage
//! - **app**: builder, controller and per-video drivers
//! - **config**: TOML + environment configuration
//! - **notes**: Markdown note and mind-map page export

pub mod app;
pub mod config;
pub mod domain;
pub mod executors;
pub mod impls;
pub mod notes;
pub mod ports;
pub mod services;

pub use app::{BuildError, JobStatus, PipelineBuilder, PipelineController, PipelineCounts};
pub use config::{AppConfig, ConfigError, StepMode};
pub use domain::{ArtifactKind, ErrorKind, Job, JobEvent, PipelineError, Stage, VideoId};
