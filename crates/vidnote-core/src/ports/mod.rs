//! Ports: the seams between the controller and everything it drives.
//!
//! Stores and executors are traits so the controller can run against the
//! filesystem in production and against in-memory fakes in tests.

pub mod artifact_store;
pub mod clock;
pub mod event_sink;
pub mod executor;
pub mod id_generator;
pub mod job_store;

pub use self::artifact_store::ArtifactStore;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, EventSinkError, NoopEventSink};
pub use self::executor::{StageExecutor, StageInput, StageOutput};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::JobStore;
