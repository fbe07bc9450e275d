use thiserror::Error;

use crate::task::TaskKind;

/// Error taxonomy shared by every core component (`forge-store`, `forge-pool`,
/// `forge-server`). Boundary code (CLI, HTTP handlers) is free to wrap this in
/// `anyhow::Error`; library code never does.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad model options, unknown engine, duplicate id. Fatal at construction
    /// or `init` time.
    #[error("invalid configuration: {message}")]
    ConfigInvalid { message: String },

    /// Artifact missing, checksum mismatch, download failed, or
    /// re-validation after download failed.
    #[error("failed to prepare model '{model_id}': {message}")]
    PrepareFailed { model_id: String, message: String },

    /// The engine's `createInstance` rejected.
    #[error("failed to load instance for model '{model_id}': {message}")]
    LoadFailed { model_id: String, message: String },

    /// The engine does not implement the processor for this task kind.
    #[error("engine '{engine}' does not support task kind {task:?}")]
    EngineUnsupported { engine: String, task: TaskKind },

    /// Empty messages/prompt/input, invalid image/audio.
    #[error("invalid input: {message}")]
    InputInvalid { message: String },

    /// The caller aborted the task.
    #[error("task {task_id} cancelled")]
    Cancelled { task_id: u64 },

    /// The per-task timeout elapsed.
    #[error("task {task_id} timed out")]
    TimedOut { task_id: u64 },

    /// The pool was disposed while the caller's request was queued.
    #[error("pool shut down{}", task_id.map(|t| format!(" while task {t} was queued")).unwrap_or_default())]
    PoolShutdown { task_id: Option<u64> },

    /// GPU required but held by a busy instance and `maxInstances` reached
    /// for all eligible models. Per spec this is not surfaced as an error to
    /// the caller directly (the caller enqueues) — it exists so internal
    /// selection code has a named outcome to log and test against.
    #[error("gpu unavailable for model '{model_id}'")]
    GpuUnavailable { model_id: String },

    /// No `ModelConfig` registered under this id.
    #[error("model '{model_id}' not found")]
    ModelNotFound { model_id: String },

    /// A referenced task id does not exist in the issuing component's
    /// bookkeeping.
    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid { message: message.into() }
    }

    pub fn input_invalid(message: impl Into<String>) -> Self {
        Self::InputInvalid { message: message.into() }
    }
}
