//! Application layer: the controller and what it is built from.
//!
//! - **PipelineBuilder**: wiring and start-up validation
//! - **PipelineController**: caller surface (submit, status, cancel, retry...)
//! - **driver**: per-video task moving a job through its stages
//! - **ExecutorRegistry**: one executor per stage
//! - **status**: caller-facing views

pub mod builder;
pub mod controller;
mod driver;
pub mod locks;
pub mod registry;
pub mod status;

pub use self::builder::{BuildError, PipelineBuilder};
pub use self::controller::PipelineController;
pub use self::locks::KeyedLocks;
pub use self::registry::{ExecutorRegistry, RegistryError};
pub use self::status::{JobStatus, PipelineCounts};
