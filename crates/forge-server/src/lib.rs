//! Composition root (§4.5): binds the Store, the Pool, and the registered
//! engines behind one façade with a `process_*` method per task kind.
//!
//! Mirrors the teacher's `api::init`/`CallBuilder` split — a single entry
//! point builds the whole runtime, and every call afterwards goes through
//! a narrow per-task method rather than a generic "submit a job" API — but
//! the dispatch contract itself (§4.3) is new: `dispatch::begin_task` +
//! `finish_completion`/`finish_plain` implement it once and every
//! `process_*` method below is a thin, task-kind-specific wrapper.

mod config;
mod dispatch;

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use forge_engine::EngineAdapter;
use forge_pool::{ContextHint, InstancePool, PoolStatus};
use forge_store::{ModelStore, StoredModel};
use forge_types::{
    ChatCompletionArgs, ChatCompletionResult, CompletionOptions, CoreError, EmbeddingArgs,
    EmbeddingResult, ImageToImageArgs, ImageToImageResult, ImageToTextArgs, ImageToTextResult,
    ModelConfig, ModelId, ObjectDetectionArgs, ObjectDetectionResult, SpeechToTextArgs,
    SpeechToTextResult, TaskKind, TextClassificationArgs, TextClassificationResult,
    TextCompletionArgs, TextCompletionResult, TextToImageArgs, TextToImageResult,
    TextToSpeechArgs, TextToSpeechResult,
};

pub use config::ServerConfig;

/// The composition root. Cheap to clone via `Arc`; every method borrows
/// `&self` and is safe to call from many tasks concurrently (the Pool and
/// Store are themselves actor-backed).
pub struct InferenceServer {
    store: Arc<ModelStore>,
    pool: Arc<InstancePool>,
    configs: HashMap<ModelId, Arc<ModelConfig>>,
    engines: HashMap<String, Arc<dyn EngineAdapter>>,
    task_seq: AtomicU64,
}

impl InferenceServer {
    /// Bind a config and an engine registry into a running server (§6).
    /// Runs every engine's `start()` hook, then builds the Store (settling
    /// `blocking`-mode models before returning) and the Pool (preallocating
    /// `minInstances`) on top of it.
    pub async fn start(
        config: ServerConfig,
        engines: HashMap<String, Arc<dyn EngineAdapter>>,
    ) -> Result<Arc<Self>, CoreError> {
        for engine in engines.values() {
            engine.start().await?;
        }

        let configs: HashMap<ModelId, Arc<ModelConfig>> = config
            .models
            .iter()
            .map(|c| (c.id.clone(), Arc::new(c.clone())))
            .collect();

        let store = ModelStore::init(
            config.models.clone(),
            engines.clone(),
            config.cache_path.clone(),
            config.prepare_concurrency,
        )
        .await?;

        let pool = InstancePool::init(config.models, engines.clone(), store.clone(), config.concurrency).await?;

        Ok(Arc::new(Self { store, pool, configs, engines, task_seq: AtomicU64::new(0) }))
    }

    pub(crate) fn config_for(&self, model: &ModelId) -> Result<Arc<ModelConfig>, CoreError> {
        self.configs
            .get(model)
            .cloned()
            .ok_or_else(|| CoreError::ModelNotFound { model_id: model.to_string() })
    }

    /// §6 `GET /v1/models` — every configured model's current load status.
    pub async fn list_models(&self) -> Vec<StoredModel> {
        let mut out = Vec::with_capacity(self.configs.len());
        for id in self.configs.keys() {
            if let Some(m) = self.store.status(id).await {
                out.push(m);
            }
        }
        out
    }

    pub async fn model_status(&self, id: &ModelId) -> Option<StoredModel> {
        self.store.status(id).await
    }

    /// §6 CLI `prepare` / eager warm-up outside the normal on-demand path.
    pub async fn prepare_model(&self, id: &ModelId) -> Result<StoredModel, CoreError> {
        self.store.prepare_model(id, None).await
    }

    pub async fn status(&self) -> PoolStatus {
        self.pool.status().await
    }

    /// Cancels every in-flight task and tears down all instances. The Pool
    /// cascades into disposing the Store itself (`forge_pool::pool`'s own
    /// `on_dispose`), so nothing further is needed here.
    pub async fn stop(&self) {
        self.pool.dispose().await;
    }

    pub async fn process_chat_completion(
        &self,
        args: ChatCompletionArgs,
    ) -> Result<ChatCompletionResult, CoreError> {
        if args.messages.is_empty() {
            return Err(CoreError::input_invalid("messages must not be empty"));
        }
        let options = args.options.clone();
        let hint = forge_pool::chat_digest(&args.messages, true);
        let mut history = args.messages.clone();
        let (lease, ctx, controller, seq) = self
            .begin_task(
                TaskKind::ChatCompletion,
                args.model.clone(),
                ContextHint::Chat(hint),
                options.signal.clone(),
                options.timeout,
            )
            .await?;
        let engine = self.engine_for(&ctx.config)?;
        let raced = controller.race(engine.process_chat_completion(&ctx, args)).await;
        self.finish_completion(lease, ctx, raced, seq, move |result: &ChatCompletionResult| {
            history.push(result.message.clone());
            Some(forge_pool::chat_digest(&history, false))
        })
    }

    pub async fn process_text_completion(
        &self,
        args: TextCompletionArgs,
    ) -> Result<TextCompletionResult, CoreError> {
        if args.prompt.is_empty() {
            return Err(CoreError::input_invalid("prompt must not be empty"));
        }
        let options = args.options.clone();
        let prompt = args.prompt.clone();
        let (lease, ctx, controller, seq) = self
            .begin_task(
                TaskKind::TextCompletion,
                args.model.clone(),
                ContextHint::Text(prompt.clone()),
                options.signal.clone(),
                options.timeout,
            )
            .await?;
        let engine = self.engine_for(&ctx.config)?;
        let raced = controller.race(engine.process_text_completion(&ctx, args)).await;
        self.finish_completion(lease, ctx, raced, seq, move |result: &TextCompletionResult| {
            Some(forge_pool::text_identity(&prompt, &result.text))
        })
    }

    pub async fn process_embedding(&self, args: EmbeddingArgs) -> Result<EmbeddingResult, CoreError> {
        let empty = match &args.input {
            forge_types::EmbeddingInput::One(s) => s.is_empty(),
            forge_types::EmbeddingInput::Many(v) => v.is_empty(),
        };
        if empty {
            return Err(CoreError::input_invalid("input must not be empty"));
        }
        self.dispatch_plain(TaskKind::Embedding, args.model.clone(), None, None, |engine, ctx| {
            Box::pin(async move { engine.process_embedding(ctx, args).await })
        })
        .await
    }

    pub async fn process_image_to_text(
        &self,
        args: ImageToTextArgs,
    ) -> Result<ImageToTextResult, CoreError> {
        if args.image.is_empty() {
            return Err(CoreError::input_invalid("image must not be empty"));
        }
        self.dispatch_plain(TaskKind::ImageToText, args.model.clone(), None, None, |engine, ctx| {
            Box::pin(async move { engine.process_image_to_text(ctx, args).await })
        })
        .await
    }

    pub async fn process_text_to_image(
        &self,
        args: TextToImageArgs,
    ) -> Result<TextToImageResult, CoreError> {
        if args.prompt.is_empty() {
            return Err(CoreError::input_invalid("prompt must not be empty"));
        }
        self.dispatch_plain(TaskKind::TextToImage, args.model.clone(), None, None, |engine, ctx| {
            Box::pin(async move { engine.process_text_to_image(ctx, args).await })
        })
        .await
    }

    pub async fn process_image_to_image(
        &self,
        args: ImageToImageArgs,
    ) -> Result<ImageToImageResult, CoreError> {
        if args.image.is_empty() {
            return Err(CoreError::input_invalid("image must not be empty"));
        }
        self.dispatch_plain(TaskKind::ImageToImage, args.model.clone(), None, None, |engine, ctx| {
            Box::pin(async move { engine.process_image_to_image(ctx, args).await })
        })
        .await
    }

    pub async fn process_speech_to_text(
        &self,
        args: SpeechToTextArgs,
    ) -> Result<SpeechToTextResult, CoreError> {
        if args.audio.is_empty() {
            return Err(CoreError::input_invalid("audio must not be empty"));
        }
        let options = args.options.clone();
        let (lease, ctx, controller, seq) = self
            .begin_task(
                TaskKind::SpeechToText,
                args.model.clone(),
                ContextHint::None,
                options.signal.clone(),
                options.timeout,
            )
            .await?;
        let engine = self.engine_for(&ctx.config)?;
        let raced = controller.race(engine.process_speech_to_text(&ctx, args)).await;
        self.finish_completion(lease, ctx, raced, seq, |_: &SpeechToTextResult| None)
    }

    pub async fn process_text_to_speech(
        &self,
        args: TextToSpeechArgs,
    ) -> Result<TextToSpeechResult, CoreError> {
        if args.text.is_empty() {
            return Err(CoreError::input_invalid("text must not be empty"));
        }
        let timeout = args.options.timeout;
        let signal = args.options.signal.clone();
        self.dispatch_plain(TaskKind::TextToSpeech, args.model.clone(), signal, timeout, |engine, ctx| {
            Box::pin(async move { engine.process_text_to_speech(ctx, args).await })
        })
        .await
    }

    pub async fn process_object_detection(
        &self,
        args: ObjectDetectionArgs,
    ) -> Result<ObjectDetectionResult, CoreError> {
        if args.image.is_empty() {
            return Err(CoreError::input_invalid("image must not be empty"));
        }
        self.dispatch_plain(TaskKind::ObjectDetection, args.model.clone(), None, None, |engine, ctx| {
            Box::pin(async move { engine.process_object_detection(ctx, args).await })
        })
        .await
    }

    pub async fn process_text_classification(
        &self,
        args: TextClassificationArgs,
    ) -> Result<TextClassificationResult, CoreError> {
        if args.text.is_empty() {
            return Err(CoreError::input_invalid("text must not be empty"));
        }
        self.dispatch_plain(TaskKind::TextClassification, args.model.clone(), None, None, |engine, ctx| {
            Box::pin(async move { engine.process_text_classification(ctx, args).await })
        })
        .await
    }

    /// Shared shape for every task kind routed through [`Self::finish_plain`]:
    /// begin, call the engine under the one `task_controller` race, finish.
    async fn dispatch_plain<T, F>(
        &self,
        kind: TaskKind,
        model: ModelId,
        signal: Option<forge_types::CancelSignal>,
        timeout: Option<std::time::Duration>,
        call: F,
    ) -> Result<T, CoreError>
    where
        F: for<'a> FnOnce(
            Arc<dyn EngineAdapter>,
            &'a forge_engine::TaskContext,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<T, CoreError>> + Send + 'a>>,
    {
        let (lease, ctx, controller, seq) =
            self.begin_task(kind, model, ContextHint::None, signal, timeout).await?;
        let engine = self.engine_for(&ctx.config)?;
        let raced = controller.race(call(engine, &ctx)).await;
        self.finish_plain(lease, ctx, raced, seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_engines_builtin::EchoEngine;
    use forge_types::{ChatMessage, DeviceConfig, GpuPreference, PrepareMode, Role};

    fn chat_model(id: &str) -> ModelConfig {
        ModelConfig {
            id: ModelId::new(id).unwrap(),
            engine: "builtin.echo".into(),
            task: TaskKind::ChatCompletion,
            url: None,
            location: None,
            sha256: None,
            md5: None,
            min_instances: 0,
            max_instances: 2,
            ttl: std::time::Duration::from_secs(60),
            context_size: None,
            batch_size: None,
            device: DeviceConfig { gpu: GpuPreference::Bool(false), ..Default::default() },
            prepare: PrepareMode::OnDemand,
            completion_defaults: serde_json::Value::Null,
            initial_messages: None,
            prefix: None,
            grammars: None,
            tools: None,
            extra: serde_json::Map::new(),
        }
    }

    async fn test_server(models: Vec<ModelConfig>) -> Arc<InferenceServer> {
        let dir = tempfile::tempdir().unwrap();
        let mut engines: HashMap<String, Arc<dyn EngineAdapter>> = HashMap::new();
        engines.insert("builtin.echo".into(), Arc::new(EchoEngine::new()));
        let config = ServerConfig::new(models, dir.into_path());
        InferenceServer::start(config, engines).await.unwrap()
    }

    #[tokio::test]
    async fn chat_completion_round_trips_through_the_pool() {
        let server = test_server(vec![chat_model("m1")]).await;
        let result = server
            .process_chat_completion(ChatCompletionArgs {
                model: ModelId::new("m1").unwrap(),
                messages: vec![ChatMessage { role: Role::User, content: "hello".into() }],
                options: CompletionOptions::default(),
            })
            .await
            .unwrap();
        assert_eq!(result.message.content, "hello");
        server.stop().await;
    }

    #[tokio::test]
    async fn unknown_model_is_rejected() {
        let server = test_server(vec![chat_model("m1")]).await;
        let err = server
            .process_chat_completion(ChatCompletionArgs {
                model: ModelId::new("does-not-exist").unwrap(),
                messages: vec![ChatMessage { role: Role::User, content: "hi".into() }],
                options: CompletionOptions::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ModelNotFound { .. }));
        server.stop().await;
    }

    #[tokio::test]
    async fn task_kind_mismatch_is_rejected() {
        let server = test_server(vec![chat_model("m1")]).await;
        let err = server
            .process_text_completion(TextCompletionArgs {
                model: ModelId::new("m1").unwrap(),
                prompt: "hi".into(),
                options: CompletionOptions::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::EngineUnsupported { .. }));
        server.stop().await;
    }

    #[tokio::test]
    async fn empty_messages_are_rejected_before_touching_the_pool() {
        let server = test_server(vec![chat_model("m1")]).await;
        let err = server
            .process_chat_completion(ChatCompletionArgs {
                model: ModelId::new("m1").unwrap(),
                messages: vec![],
                options: CompletionOptions::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InputInvalid { .. }));
        server.stop().await;
    }

    #[tokio::test]
    async fn caller_cancel_synthesizes_cancel_finish_reason() {
        let server = test_server(vec![chat_model("m1")]).await;
        let (handle, signal) = forge_types::cancel_pair();
        handle.cancel();
        let result = server
            .process_chat_completion(ChatCompletionArgs {
                model: ModelId::new("m1").unwrap(),
                messages: vec![ChatMessage { role: Role::User, content: "hello".into() }],
                options: CompletionOptions { signal: Some(signal), ..Default::default() },
            })
            .await
            .unwrap();
        assert_eq!(result.finish_reason, forge_types::FinishReason::Cancel);
        server.stop().await;
    }
}
