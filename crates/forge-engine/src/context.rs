use std::any::Any;
use std::sync::Arc;

use forge_types::ModelConfig;
use tracing::Span;

/// Opaque, engine-owned handle to a loaded instance. The pool stores one of
/// these per `ModelInstance` and hands it back to the owning engine on every
/// `process_*` call and on `dispose_instance`; it never inspects the
/// contents itself.
pub struct InstanceHandle(Box<dyn Any + Send + Sync>);

impl InstanceHandle {
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self(Box::new(value))
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.0.downcast_mut()
    }
}

impl std::fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("InstanceHandle(..)")
    }
}

/// Everything an engine's `process_*` method needs beyond the task's own
/// arguments: the instance it was routed to, the model's static config, and
/// whether the engine must clear its own chat/session state before this
/// call (§4.3's context-identity rule).
pub struct TaskContext {
    pub handle: InstanceHandle,
    pub config: Arc<ModelConfig>,
    pub reset_context: bool,
    span: Span,
}

impl TaskContext {
    pub fn new(handle: InstanceHandle, config: Arc<ModelConfig>, reset_context: bool) -> Self {
        let span = tracing::info_span!("task", model = %config.id, engine = %config.engine);
        Self {
            handle,
            config,
            reset_context,
            span,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Recover the instance handle once the engine call has returned, so the
    /// caller can hand it back to the `Lease` before releasing.
    pub fn into_handle(self) -> InstanceHandle {
        self.handle
    }
}
