//! A dependency-free reference [`EngineAdapter`] that echoes its input back.
//!
//! Grounded on the teacher's own `spawn_echo_backend`/`spawn_stream_backend`
//! test helpers (`api/mod.rs`): no real model weights, no native runtime —
//! just enough determinism to exercise the Store/Pool/Instance machinery in
//! tests and to give `bin/forge-server` something to boot against out of the
//! box.

use std::time::Duration;

use async_trait::async_trait;
use forge_engine::{CancelToken, EngineAdapter, InstanceHandle, TaskContext};
use forge_types::{
    ChatCompletionArgs, ChatCompletionResult, ChatMessage, CoreError, EmbeddingArgs,
    EmbeddingInput, EmbeddingResult, FinishReason, ModelConfig, Role, StreamChunk,
    TextCompletionArgs, TextCompletionResult, TokenUsage,
};

/// How long the echo engine pretends to "think" per emitted token when
/// streaming — long enough for a test to observe a chunk and then cancel.
const TOKEN_DELAY: Duration = Duration::from_millis(5);

/// Stateless; every instance is interchangeable, so `create_instance` never
/// actually allocates anything beyond a marker handle.
pub struct EchoEngine;

impl EchoEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EchoEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineAdapter for EchoEngine {
    fn name(&self) -> &str {
        "builtin.echo"
    }

    async fn prepare_model(&self, _config: &ModelConfig, _cancel: CancelToken) -> Result<(), CoreError> {
        Ok(())
    }

    async fn create_instance(
        &self,
        _config: &ModelConfig,
        _cancel: CancelToken,
    ) -> Result<InstanceHandle, CoreError> {
        Ok(InstanceHandle::new(()))
    }

    async fn dispose_instance(&self, _handle: InstanceHandle) {}

    async fn process_chat_completion(
        &self,
        ctx: &TaskContext,
        args: ChatCompletionArgs,
    ) -> Result<ChatCompletionResult, CoreError> {
        let last_user = args
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .ok_or_else(|| CoreError::input_invalid("chat completion requires at least one user message"))?;

        let prompt_tokens = args.messages.iter().map(|m| word_count(&m.content)).sum::<u32>();
        let reply = echo_text(&last_user.content, ctx.reset_context);
        let completion_tokens = stream_words(&reply, &args.options.on_chunk).await;

        Ok(ChatCompletionResult {
            message: ChatMessage { role: Role::Assistant, content: reply },
            finish_reason: FinishReason::EogToken,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                context_tokens: prompt_tokens + completion_tokens,
            },
        })
    }

    async fn process_text_completion(
        &self,
        ctx: &TaskContext,
        args: TextCompletionArgs,
    ) -> Result<TextCompletionResult, CoreError> {
        if args.prompt.is_empty() {
            return Err(CoreError::input_invalid("text completion requires a non-empty prompt"));
        }

        let prompt_tokens = word_count(&args.prompt);
        let reply = echo_text(&args.prompt, ctx.reset_context);
        let completion_tokens = stream_words(&reply, &args.options.on_chunk).await;

        Ok(TextCompletionResult {
            text: reply,
            finish_reason: FinishReason::EogToken,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                context_tokens: prompt_tokens + completion_tokens,
            },
        })
    }

    async fn process_embedding(
        &self,
        _ctx: &TaskContext,
        args: EmbeddingArgs,
    ) -> Result<EmbeddingResult, CoreError> {
        let inputs = match args.input {
            EmbeddingInput::One(s) => vec![s],
            EmbeddingInput::Many(v) => v,
        };
        if inputs.is_empty() {
            return Err(CoreError::input_invalid("embedding requires at least one input string"));
        }
        Ok(EmbeddingResult {
            embeddings: inputs.iter().map(|s| fingerprint_vector(s)).collect(),
        })
    }
}

fn word_count(s: &str) -> u32 {
    s.split_whitespace().count() as u32
}

/// Echoes the input verbatim, prefixed to make clear a reset happened —
/// the only observable effect `resetContext` has on this engine.
fn echo_text(input: &str, reset_context: bool) -> String {
    if reset_context {
        format!("[reset] {input}")
    } else {
        input.to_string()
    }
}

/// Emits `text` to `on_chunk` one word at a time, in order, each preceded by
/// a short delay so a cancelling caller observes at least one chunk before
/// the result resolves (§8 S6). Returns the number of tokens emitted.
async fn stream_words(text: &str, on_chunk: &Option<forge_types::ChunkCallback>) -> u32 {
    let words: Vec<&str> = text.split_whitespace().collect();
    let Some(callback) = on_chunk else {
        return words.len() as u32;
    };
    let mut emitted = String::new();
    for (i, word) in words.iter().enumerate() {
        if i > 0 {
            emitted.push(' ');
        }
        emitted.push_str(word);
        callback(StreamChunk::Completion {
            tokens: vec![word.to_string()],
            text: emitted.clone(),
        });
        tokio::time::sleep(TOKEN_DELAY).await;
    }
    words.len() as u32
}

/// A small deterministic embedding: not semantically meaningful, but stable
/// across calls so context-reuse and caching tests have something to assert
/// on without pulling in a real embedding model.
fn fingerprint_vector(input: &str) -> Vec<f32> {
    const DIMS: usize = 8;
    let mut state = 0xcbf29ce484222325u64;
    let mut out = Vec::with_capacity(DIMS);
    for byte in input.bytes().chain(std::iter::repeat(0).take(DIMS)) {
        state ^= byte as u64;
        state = state.wrapping_mul(0x100000001b3);
        if out.len() < DIMS {
            out.push(((state % 2000) as f32 / 1000.0) - 1.0);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_types::{CompletionOptions, ModelId};

    fn ctx(reset: bool) -> TaskContext {
        TaskContext::new(
            InstanceHandle::new(()),
            std::sync::Arc::new(test_config()),
            reset,
        )
    }

    fn test_config() -> ModelConfig {
        ModelConfig {
            id: ModelId::new("echo").unwrap(),
            engine: "builtin.echo".into(),
            task: forge_types::TaskKind::ChatCompletion,
            url: None,
            location: None,
            sha256: None,
            md5: None,
            min_instances: 0,
            max_instances: 1,
            ttl: Duration::from_secs(300),
            context_size: None,
            batch_size: None,
            device: Default::default(),
            prepare: Default::default(),
            completion_defaults: serde_json::Value::Null,
            initial_messages: None,
            prefix: None,
            grammars: None,
            tools: None,
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn chat_completion_echoes_last_user_message() {
        let engine = EchoEngine::new();
        let result = engine
            .process_chat_completion(
                &ctx(false),
                ChatCompletionArgs {
                    model: ModelId::new("echo").unwrap(),
                    messages: vec![
                        ChatMessage { role: Role::System, content: "be nice".into() },
                        ChatMessage { role: Role::User, content: "hello there".into() },
                    ],
                    options: CompletionOptions::default(),
                },
            )
            .await
            .unwrap();

        assert_eq!(result.message.content, "hello there");
        assert_eq!(result.message.role, Role::Assistant);
        assert_eq!(result.finish_reason, FinishReason::EogToken);
    }

    #[tokio::test]
    async fn reset_context_is_observable_in_output() {
        let engine = EchoEngine::new();
        let result = engine
            .process_chat_completion(
                &ctx(true),
                ChatCompletionArgs {
                    model: ModelId::new("echo").unwrap(),
                    messages: vec![ChatMessage { role: Role::User, content: "hi".into() }],
                    options: CompletionOptions::default(),
                },
            )
            .await
            .unwrap();
        assert!(result.message.content.starts_with("[reset]"));
    }

    #[tokio::test]
    async fn chat_completion_rejects_missing_user_message() {
        let engine = EchoEngine::new();
        let result = engine
            .process_chat_completion(
                &ctx(false),
                ChatCompletionArgs {
                    model: ModelId::new("echo").unwrap(),
                    messages: vec![ChatMessage { role: Role::System, content: "only system".into() }],
                    options: CompletionOptions::default(),
                },
            )
            .await;
        assert!(matches!(result, Err(CoreError::InputInvalid { .. })));
    }

    #[tokio::test]
    async fn streaming_emits_words_in_order_before_resolving() {
        let engine = EchoEngine::new();
        let received = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let options = CompletionOptions {
            on_chunk: Some(std::sync::Arc::new(move |chunk| {
                if let StreamChunk::Completion { text, .. } = chunk {
                    received_clone.lock().unwrap().push(text);
                }
            })),
            ..Default::default()
        };

        let result = engine
            .process_text_completion(
                &ctx(false),
                TextCompletionArgs { model: ModelId::new("echo").unwrap(), prompt: "a b c".into(), options },
            )
            .await
            .unwrap();

        assert_eq!(result.text, "a b c");
        assert_eq!(*received.lock().unwrap(), vec!["a", "a b", "a b c"]);
    }

    #[tokio::test]
    async fn embeddings_are_deterministic() {
        let engine = EchoEngine::new();
        let a = engine
            .process_embedding(
                &ctx(false),
                EmbeddingArgs { model: ModelId::new("echo").unwrap(), input: EmbeddingInput::One("hello".into()) },
            )
            .await
            .unwrap();
        let b = engine
            .process_embedding(
                &ctx(false),
                EmbeddingArgs { model: ModelId::new("echo").unwrap(), input: EmbeddingInput::One("hello".into()) },
            )
            .await
            .unwrap();
        assert_eq!(a.embeddings, b.embeddings);
        assert_eq!(a.embeddings[0].len(), 8);
    }

    #[tokio::test]
    async fn embeddings_reject_empty_input() {
        let engine = EchoEngine::new();
        let result = engine
            .process_embedding(
                &ctx(false),
                EmbeddingArgs { model: ModelId::new("echo").unwrap(), input: EmbeddingInput::Many(vec![]) },
            )
            .await;
        assert!(matches!(result, Err(CoreError::InputInvalid { .. })));
    }
}
