use async_trait::async_trait;
use forge_types::{
    ChatCompletionArgs, ChatCompletionResult, CoreError, EmbeddingArgs, EmbeddingResult,
    ImageToImageArgs, ImageToImageResult, ImageToTextArgs, ImageToTextResult, ModelConfig,
    ObjectDetectionArgs, ObjectDetectionResult, SpeechToTextArgs, SpeechToTextResult, TaskKind,
    TextClassificationArgs, TextClassificationResult, TextCompletionArgs, TextCompletionResult,
    TextToImageArgs, TextToImageResult, TextToSpeechArgs, TextToSpeechResult,
};

use crate::cancel::CancelToken;
use crate::context::{InstanceHandle, TaskContext};

/// The capability interface every engine implements (§4.1). A given engine
/// only needs to override the `process_*` methods for the task kinds it
/// actually registers models under — the rest fall back to
/// [`EngineUnsupported`](CoreError::EngineUnsupported).
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// Stable name this engine is registered under (matches `ModelConfig.engine`).
    fn name(&self) -> &str;

    /// Whether this engine negotiates its own GPU placement. When `true`
    /// the pool never arbitrates the GPU lease on the engine's behalf and
    /// `device.gpu` is advisory only.
    fn auto_gpu(&self) -> bool {
        false
    }

    /// One-shot initialization invoked by the server composition root
    /// before any model registered under this engine is prepared.
    async fn start(&self) -> Result<(), CoreError> {
        Ok(())
    }

    /// Ensure the model's artifacts are present and valid. Called by the
    /// store, not the pool; may be invoked concurrently for distinct
    /// models but never twice concurrently for the same one.
    async fn prepare_model(&self, config: &ModelConfig, cancel: CancelToken) -> Result<(), CoreError>;

    /// Load a fresh instance of an already-prepared model.
    async fn create_instance(
        &self,
        config: &ModelConfig,
        cancel: CancelToken,
    ) -> Result<InstanceHandle, CoreError>;

    /// Release whatever resources `handle` holds. Never fails outward —
    /// engines log and swallow their own teardown errors.
    async fn dispose_instance(&self, handle: InstanceHandle);

    async fn process_chat_completion(
        &self,
        ctx: &TaskContext,
        _args: ChatCompletionArgs,
    ) -> Result<ChatCompletionResult, CoreError> {
        Err(self.unsupported(ctx, TaskKind::ChatCompletion))
    }

    async fn process_text_completion(
        &self,
        ctx: &TaskContext,
        _args: TextCompletionArgs,
    ) -> Result<TextCompletionResult, CoreError> {
        Err(self.unsupported(ctx, TaskKind::TextCompletion))
    }

    async fn process_embedding(
        &self,
        ctx: &TaskContext,
        _args: EmbeddingArgs,
    ) -> Result<EmbeddingResult, CoreError> {
        Err(self.unsupported(ctx, TaskKind::Embedding))
    }

    async fn process_image_to_text(
        &self,
        ctx: &TaskContext,
        _args: ImageToTextArgs,
    ) -> Result<ImageToTextResult, CoreError> {
        Err(self.unsupported(ctx, TaskKind::ImageToText))
    }

    async fn process_text_to_image(
        &self,
        ctx: &TaskContext,
        _args: TextToImageArgs,
    ) -> Result<TextToImageResult, CoreError> {
        Err(self.unsupported(ctx, TaskKind::TextToImage))
    }

    async fn process_image_to_image(
        &self,
        ctx: &TaskContext,
        _args: ImageToImageArgs,
    ) -> Result<ImageToImageResult, CoreError> {
        Err(self.unsupported(ctx, TaskKind::ImageToImage))
    }

    async fn process_speech_to_text(
        &self,
        ctx: &TaskContext,
        _args: SpeechToTextArgs,
    ) -> Result<SpeechToTextResult, CoreError> {
        Err(self.unsupported(ctx, TaskKind::SpeechToText))
    }

    async fn process_text_to_speech(
        &self,
        ctx: &TaskContext,
        _args: TextToSpeechArgs,
    ) -> Result<TextToSpeechResult, CoreError> {
        Err(self.unsupported(ctx, TaskKind::TextToSpeech))
    }

    async fn process_object_detection(
        &self,
        ctx: &TaskContext,
        _args: ObjectDetectionArgs,
    ) -> Result<ObjectDetectionResult, CoreError> {
        Err(self.unsupported(ctx, TaskKind::ObjectDetection))
    }

    async fn process_text_classification(
        &self,
        ctx: &TaskContext,
        _args: TextClassificationArgs,
    ) -> Result<TextClassificationResult, CoreError> {
        Err(self.unsupported(ctx, TaskKind::TextClassification))
    }

    fn unsupported(&self, ctx: &TaskContext, task: TaskKind) -> CoreError {
        let _enter = ctx.span().enter();
        tracing::warn!(engine = self.name(), ?task, "task kind not implemented by this engine");
        CoreError::EngineUnsupported {
            engine: self.name().to_string(),
            task,
        }
    }
}
