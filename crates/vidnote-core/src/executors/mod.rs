//! Stage executors: one [`StageExecutor`](crate::ports::StageExecutor) per
//! pipeline stage.

pub mod downloader;
pub mod outline;
pub mod summarizer;
pub mod transcriber;

pub use downloader::Downloader;
pub use summarizer::{MindmapGenerator, Summarizer, SummarizerOptions};
pub use transcriber::Transcriber;
