use forge_types::ModelId;

use crate::context::ContextIdentity;

/// The payload shape the Pool needs to run context-match selection,
/// without caring about task-kind-specific fields (§4.4 step 2).
#[derive(Debug, Clone)]
pub enum ContextHint {
    /// A chat request's digest, computed with `dropLastUserMessage=true`.
    Chat(ContextIdentity),
    /// A text-completion request's raw prompt, matched by prefix.
    Text(String),
    /// Task kinds with no context-identity concept.
    None,
}

/// Transient request for an instance (§3). `sequence` is assigned by the
/// pool on submission and is what the FIFO queue orders on.
#[derive(Debug, Clone)]
pub struct PoolRequest {
    pub sequence: u64,
    pub model: ModelId,
    pub context_hint: ContextHint,
    pub requires_gpu: bool,
}
