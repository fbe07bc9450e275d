use std::sync::Arc;
use std::time::Instant;

use forge_engine::InstanceHandle;
use forge_types::ModelConfig;

use crate::context::ContextIdentity;

/// `preparing` (construction only) → `loading` (during `load`) → `idle` ⇄
/// `busy` → `error` (terminal on load failure) → `disposed` (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Preparing,
    Loading,
    Idle,
    Busy,
    Error,
    Disposed,
}

/// Stable identifier: `<modelId>:<8-char nanoid>` (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(model_id: &str) -> Self {
        Self(format!("{model_id}:{}", nanoid::nanoid!(8)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A hash of the config fields that affect runtime behavior — used only to
/// detect whether a live instance is still representative of its model's
/// current config (engine-specific extensions aside, nothing short of a
/// process restart changes `ModelConfig` today, so this is mostly a
/// forward-compatibility seam for hot-reload).
pub fn fingerprint(config: &ModelConfig) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    config.id.as_str().hash(&mut hasher);
    config.engine.hash(&mut hasher);
    config.context_size.hash(&mut hasher);
    config.batch_size.hash(&mut hasher);
    format!("{:?}", config.device).hash(&mut hasher);
    hasher.finish()
}

/// Owned exclusively by the pool actor; never shared behind a lock.
pub struct ModelInstance {
    pub id: InstanceId,
    pub model_id: forge_types::ModelId,
    pub config: Arc<ModelConfig>,
    pub status: InstanceStatus,
    pub gpu: bool,
    pub fingerprint: u64,
    pub context_identity: Option<ContextIdentity>,
    pub needs_context_reset: bool,
    pub last_used: Instant,
    pub created_at: Instant,
    pub current_request_sequence: Option<u64>,
    pub handle: Option<InstanceHandle>,
    /// Set while this instance is being created on behalf of one specific
    /// queued request (§4.4 step 4/5). `None` for preallocated
    /// `minInstances` instances and for re-creation after an error, which
    /// have no single waiter to notify.
    pub pending_for: Option<u64>,
    /// Bumped every time the instance returns to `idle`. Lets a TTL timer
    /// scheduled for a prior idle period recognize it has been superseded
    /// (§4.4 release path step 3).
    pub version: u64,
}

impl ModelInstance {
    pub fn new(config: Arc<ModelConfig>) -> Self {
        let now = Instant::now();
        Self {
            id: InstanceId::new(config.id.as_str()),
            model_id: config.id.clone(),
            fingerprint: fingerprint(&config),
            config,
            status: InstanceStatus::Preparing,
            gpu: false,
            context_identity: None,
            needs_context_reset: false,
            last_used: now,
            created_at: now,
            current_request_sequence: None,
            handle: None,
            pending_for: None,
            version: 0,
        }
    }

    pub fn lock_for(&mut self, sequence: u64) {
        debug_assert_eq!(self.status, InstanceStatus::Idle);
        self.status = InstanceStatus::Busy;
        self.current_request_sequence = Some(sequence);
    }

    pub fn unlock(&mut self) {
        self.status = InstanceStatus::Idle;
        self.current_request_sequence = None;
        self.last_used = Instant::now();
        self.version += 1;
    }
}

/// Lightweight, `Clone`-cheap view of an instance for lock-free external
/// reads (`InstancePool::status`).
#[derive(Debug, Clone)]
pub struct InstanceSnapshot {
    pub id: InstanceId,
    pub model_id: forge_types::ModelId,
    pub status: InstanceStatus,
    pub gpu: bool,
    pub last_used: Instant,
}

impl From<&ModelInstance> for InstanceSnapshot {
    fn from(i: &ModelInstance) -> Self {
        Self {
            id: i.id.clone(),
            model_id: i.model_id.clone(),
            status: i.status,
            gpu: i.gpu,
            last_used: i.last_used,
        }
    }
}
