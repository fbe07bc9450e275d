//! The task dispatch contract common to every `process_*` façade method
//! (§4.3). Two shapes cover all ten task kinds:
//!
//! - [`InferenceServer::begin_task`]/[`InferenceServer::finish_completion`]
//!   for chat completion, text completion and speech-to-text, whose result
//!   types carry a `finishReason` and so can express "cut short" as a
//!   synthesized empty result per step 7.
//! - [`InferenceServer::begin_task`]/[`InferenceServer::finish_plain`] for
//!   every other task kind, whose result types have no `finishReason` slot
//!   — cancellation there surfaces as a plain `CoreError` instead ("others
//!   throw", §7).

use std::sync::atomic::Ordering;
use std::time::Duration;

use forge_engine::{CancelCause, EngineAdapter, TaskContext, TaskController};
use forge_pool::{ContextHint, Lease, ReleaseOutcome};
use forge_types::{CancelSignal, ChatMessage, CoreError, FinishReason, ModelId, Role, TaskKind, TokenUsage};

use crate::InferenceServer;

/// Result types that can express "the task was cut short" without an error
/// — every completion-like task whose result carries a `finishReason`.
pub(crate) trait AbortableResult: Sized {
    fn empty(reason: FinishReason) -> Self;
}

impl AbortableResult for forge_types::ChatCompletionResult {
    fn empty(reason: FinishReason) -> Self {
        Self {
            message: ChatMessage { role: Role::Assistant, content: String::new() },
            finish_reason: reason,
            usage: TokenUsage::default(),
        }
    }
}

impl AbortableResult for forge_types::TextCompletionResult {
    fn empty(reason: FinishReason) -> Self {
        Self { text: String::new(), finish_reason: reason, usage: TokenUsage::default() }
    }
}

impl AbortableResult for forge_types::SpeechToTextResult {
    fn empty(reason: FinishReason) -> Self {
        Self { text: String::new(), finish_reason: reason, usage: TokenUsage::default() }
    }
}

/// §4.3 step 6: the token that tripped while the task was *in flight*
/// (after the engine had already committed to a result in `race`'s losing
/// branch) maps to a `finishReason`, not an error.
fn finish_reason_from_cause(cause: CancelCause) -> FinishReason {
    match cause {
        CancelCause::Timeout => FinishReason::Timeout,
        CancelCause::Caller | CancelCause::Button => FinishReason::Cancel,
    }
}

/// §4.3 step 7: an error the engine itself raised that really means "this
/// task was aborted out from under me" gets the same empty-result treatment
/// as a `race` loss, instead of propagating as a hard failure.
fn abort_reason_from_error(err: &CoreError) -> Option<FinishReason> {
    match err {
        CoreError::Cancelled { .. } => Some(FinishReason::Cancel),
        CoreError::TimedOut { .. } => Some(FinishReason::Timeout),
        CoreError::PoolShutdown { .. } => Some(FinishReason::Abort),
        _ => None,
    }
}

/// Same mapping as [`finish_reason_from_cause`], but for task kinds whose
/// result has no `finishReason` slot to carry it in — they throw instead.
fn core_error_from_cause(cause: CancelCause, task_id: u64) -> CoreError {
    match cause {
        CancelCause::Timeout => CoreError::TimedOut { task_id },
        CancelCause::Caller | CancelCause::Button => CoreError::Cancelled { task_id },
    }
}

impl InferenceServer {
    pub(crate) fn next_task_seq(&self) -> u64 {
        self.task_seq.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn engine_for(&self, config: &forge_types::ModelConfig) -> Result<std::sync::Arc<dyn EngineAdapter>, CoreError> {
        self.engines.get(&config.engine).cloned().ok_or_else(|| CoreError::ConfigInvalid {
            message: format!("model '{}' references unknown engine '{}'", config.id, config.engine),
        })
    }

    /// Steps 1-5 of the dispatch contract: reject a model/task-kind mismatch
    /// up front (the model-level stand-in for "engine does not implement
    /// the required processor" — every `ModelConfig` declares exactly one
    /// primary `task`), acquire a lease (which itself bumps `lastUsed` at
    /// dispatch via `Lease::release`'s own bookkeeping once the task
    /// finishes), and build the merged cancellation controller.
    pub(crate) async fn begin_task(
        &self,
        task_kind: TaskKind,
        model: ModelId,
        context_hint: ContextHint,
        signal: Option<CancelSignal>,
        timeout: Option<Duration>,
    ) -> Result<(Lease, TaskContext, TaskController, u64), CoreError> {
        let config = self.config_for(&model)?;
        if config.task != task_kind {
            return Err(CoreError::EngineUnsupported { engine: config.engine.clone(), task: task_kind });
        }

        let seq = self.next_task_seq();
        let mut lease = self.pool.request_instance(model, context_hint, signal.clone()).await?;
        let task_id = format!("{}-{}", lease.instance_id, nanoid::nanoid!(8));
        tracing::debug!(task_id, seq, instance = %lease.instance_id, ?task_kind, "dispatching task");

        let controller = lease.task_controller(signal, timeout);
        let handle = lease.take_handle();
        let ctx = TaskContext::new(handle, lease.config.clone(), lease.reset_context);
        Ok((lease, ctx, controller, seq))
    }

    /// Steps 6-8 for chat/text/speech-to-text: success keeps the engine's
    /// own `finishReason`, a `race` loss or an abort-shaped engine error
    /// synthesizes an empty result with the appropriate one, and any other
    /// engine error propagates with the instance flagged for context reset.
    pub(crate) fn finish_completion<T: AbortableResult>(
        &self,
        mut lease: Lease,
        ctx: TaskContext,
        raced: Result<Result<T, CoreError>, CancelCause>,
        seq: u64,
        seed_identity: impl FnOnce(&T) -> Option<forge_pool::ContextIdentity>,
    ) -> Result<T, CoreError> {
        lease.put_handle(ctx.into_handle());
        match raced {
            Ok(Ok(result)) => {
                let identity = seed_identity(&result);
                lease.release(ReleaseOutcome::Completed { context_identity: identity });
                Ok(result)
            }
            Ok(Err(err)) => {
                if let Some(reason) = abort_reason_from_error(&err) {
                    tracing::debug!(seq, %err, "task aborted, synthesizing empty result");
                    lease.release(ReleaseOutcome::Completed { context_identity: None });
                    Ok(T::empty(reason))
                } else {
                    lease.release(ReleaseOutcome::Errored);
                    Err(err)
                }
            }
            Err(cause) => {
                tracing::debug!(seq, ?cause, "task cut short before the engine returned");
                lease.release(ReleaseOutcome::Completed { context_identity: None });
                Ok(T::empty(finish_reason_from_cause(cause)))
            }
        }
    }

    /// Steps 6-8 for every task kind with no `finishReason` slot: success
    /// passes through, any cancellation source throws (§7 "others throw").
    pub(crate) fn finish_plain<T>(
        &self,
        mut lease: Lease,
        ctx: TaskContext,
        raced: Result<Result<T, CoreError>, CancelCause>,
        seq: u64,
    ) -> Result<T, CoreError> {
        lease.put_handle(ctx.into_handle());
        match raced {
            Ok(Ok(result)) => {
                lease.release(ReleaseOutcome::Completed { context_identity: None });
                Ok(result)
            }
            Ok(Err(err)) => {
                lease.release(ReleaseOutcome::Errored);
                Err(err)
            }
            Err(cause) => {
                lease.release(ReleaseOutcome::Completed { context_identity: None });
                Err(core_error_from_cause(cause, seq))
            }
        }
    }
}
