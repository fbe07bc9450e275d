use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model_config::ModelId;
use crate::signal::CancelSignal;

pub type TaskId = u64;

/// The ten task kinds the server multiplexes across instances (§1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    ChatCompletion,
    TextCompletion,
    Embedding,
    ImageToText,
    TextToImage,
    ImageToImage,
    SpeechToText,
    TextToSpeech,
    ObjectDetection,
    TextClassification,
}

impl TaskKind {
    /// Whether this task kind participates in context-identity tracking and
    /// the `resetContext`/streaming-chunk machinery of §4.3.
    pub fn is_completion_like(&self) -> bool {
        matches!(self, TaskKind::ChatCompletion | TaskKind::TextCompletion)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

/// Outcome discriminant for completion-like tasks (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    EogToken,
    MaxTokens,
    StopTrigger,
    FunctionCalls,
    Timeout,
    Cancel,
    Abort,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub context_tokens: u32,
}

/// Incremental output delivered to an `onChunk` callback. Chunks are
/// delivered serially, in generation order, strictly before the final
/// result resolves (§6, §9).
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Completion { tokens: Vec<String>, text: String },
    Speech { text: String },
}

pub type ChunkCallback = Arc<dyn Fn(StreamChunk) + Send + Sync>;

/// Fields shared by every completion-like task argument struct (§6): a
/// deadline, the caller's own cancel signal, and a callback for
/// incremental output.
#[derive(Clone, Default)]
pub struct CompletionOptions {
    pub timeout: Option<Duration>,
    pub signal: Option<CancelSignal>,
    pub on_chunk: Option<ChunkCallback>,
}

impl std::fmt::Debug for CompletionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionOptions")
            .field("timeout", &self.timeout)
            .field("signal", &self.signal.as_ref().map(|s| s.is_cancelled()))
            .field("on_chunk", &self.on_chunk.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ChatCompletionArgs {
    pub model: ModelId,
    pub messages: Vec<ChatMessage>,
    pub options: CompletionOptions,
}

#[derive(Debug, Clone)]
pub struct ChatCompletionResult {
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone)]
pub struct TextCompletionArgs {
    pub model: ModelId,
    pub prompt: String,
    pub options: CompletionOptions,
}

#[derive(Debug, Clone)]
pub struct TextCompletionResult {
    pub text: String,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone)]
pub enum EmbeddingInput {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct EmbeddingArgs {
    pub model: ModelId,
    pub input: EmbeddingInput,
}

#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Clone)]
pub struct ImageToTextArgs {
    pub model: ModelId,
    pub image: bytes::Bytes,
    pub prompt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImageToTextResult {
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct TextToImageArgs {
    pub model: ModelId,
    pub prompt: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct TextToImageResult {
    pub images: Vec<bytes::Bytes>,
}

#[derive(Debug, Clone)]
pub struct ImageToImageArgs {
    pub model: ModelId,
    pub image: bytes::Bytes,
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub struct ImageToImageResult {
    pub images: Vec<bytes::Bytes>,
}

#[derive(Debug, Clone)]
pub struct SpeechToTextArgs {
    pub model: ModelId,
    pub audio: bytes::Bytes,
    pub options: CompletionOptions,
}

#[derive(Debug, Clone)]
pub struct SpeechToTextResult {
    pub text: String,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone)]
pub struct TextToSpeechArgs {
    pub model: ModelId,
    pub text: String,
    pub options: CompletionOptions,
}

#[derive(Debug, Clone)]
pub struct TextToSpeechResult {
    pub audio: bytes::Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub score: f32,
    pub bbox: [f32; 4],
}

#[derive(Debug, Clone)]
pub struct ObjectDetectionArgs {
    pub model: ModelId,
    pub image: bytes::Bytes,
}

#[derive(Debug, Clone)]
pub struct ObjectDetectionResult {
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone)]
pub struct TextClassificationArgs {
    pub model: ModelId,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct TextClassificationResult {
    pub labels: Vec<(String, f32)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_like_classifies_correctly() {
        assert!(TaskKind::ChatCompletion.is_completion_like());
        assert!(TaskKind::TextCompletion.is_completion_like());
        assert!(!TaskKind::Embedding.is_completion_like());
        assert!(!TaskKind::ObjectDetection.is_completion_like());
    }
}
