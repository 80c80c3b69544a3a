//! External services the executors call: media fetcher, speech-to-text,
//! and a chat-completion language model.

pub mod fetcher;
pub mod language_model;
pub mod transcription;

pub use fetcher::{FetchError, FetchedMedia, MediaFetcher, YtDlpFetcher};
pub use language_model::{ChatMessage, ChatRequest, LanguageModel, ModelError, OpenAiCompatibleModel};
pub use transcription::{
    HttpTranscriptionService, TranscriptionError, TranscriptionRequest, TranscriptionService,
};
