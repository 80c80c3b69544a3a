//! Store implementations.
//!
//! - `InMemory*`: tests and dry runs
//! - `Fs*`: durable local storage (atomic temp-file + rename writes)

mod fs_util;
mod placement;

pub mod fs_artifact;
pub mod fs_job;
pub mod inmem_artifact;
pub mod inmem_job;

pub use self::fs_artifact::FsArtifactStore;
pub use self::fs_job::FsJobStore;
pub use self::inmem_artifact::InMemoryArtifactStore;
pub use self::inmem_job::InMemoryJobStore;
