//! Shared data model and error taxonomy for the forge inference server.
//!
//! This crate carries no behavior — only the types every other crate agrees
//! on: `ModelConfig`, task argument/result shapes, and the `CoreError`
//! taxonomy (spec §3, §6, §7).

pub mod error;
pub mod model_config;
pub mod signal;
pub mod task;

pub use error::CoreError;
pub use model_config::{DeviceConfig, GpuPreference, ModelConfig, ModelId, PrepareMode};
pub use signal::{cancel_pair, CancelHandle, CancelSignal};
pub use task::{
    ChatCompletionArgs, ChatCompletionResult, ChatMessage, ChunkCallback, CompletionOptions,
    Detection, EmbeddingArgs, EmbeddingInput, EmbeddingResult, FinishReason, ImageToImageArgs,
    ImageToImageResult, ImageToTextArgs, ImageToTextResult, ObjectDetectionArgs,
    ObjectDetectionResult, Role, SpeechToTextArgs, SpeechToTextResult, StreamChunk, TaskId,
    TaskKind, TextClassificationArgs, TextClassificationResult, TextCompletionArgs,
    TextCompletionResult, TextToImageArgs, TextToImageResult, TextToSpeechArgs,
    TextToSpeechResult, TokenUsage,
};
