use std::sync::Arc;
use std::time::Duration;

use forge_engine::{InstanceHandle, TaskController};
use forge_types::{CancelSignal, ModelConfig, ModelId};
use tokio::sync::{mpsc, watch};

use crate::context::ContextIdentity;
use crate::instance::InstanceId;
use crate::pool::PoolMessage;

/// What a dispatched task learned about context state before the lease is
/// returned (§4.3 step 6: "update `contextIdentity` per rules above").
pub enum ReleaseOutcome {
    /// The task ran to completion; carries the instance's new context
    /// identity, if the task kind tracks one.
    Completed { context_identity: Option<ContextIdentity> },
    /// The task errored in a way that leaves context state unreliable —
    /// the instance keeps its prior identity but is flagged for reset on
    /// next use.
    Errored,
}

/// A locked [`crate::instance::ModelInstance`] ready for exactly one task
/// (§4.4). Must be released exactly once; a lease dropped without an
/// explicit [`Lease::release`] is returned to the pool as errored so a
/// panicking caller can't leak a phantom-busy instance.
pub struct Lease {
    pub instance_id: InstanceId,
    pub model_id: ModelId,
    pub config: Arc<ModelConfig>,
    pub reset_context: bool,
    handle: Option<InstanceHandle>,
    pool_tx: mpsc::UnboundedSender<PoolMessage>,
    shutdown: watch::Receiver<bool>,
    released: bool,
}

impl Lease {
    pub(crate) fn new(
        instance_id: InstanceId,
        model_id: ModelId,
        config: Arc<ModelConfig>,
        reset_context: bool,
        handle: InstanceHandle,
        pool_tx: mpsc::UnboundedSender<PoolMessage>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            instance_id,
            model_id,
            config,
            reset_context,
            handle: Some(handle),
            pool_tx,
            shutdown,
            released: false,
        }
    }

    pub fn handle(&self) -> &InstanceHandle {
        self.handle.as_ref().expect("lease handle present while held")
    }

    pub fn handle_mut(&mut self) -> &mut InstanceHandle {
        self.handle.as_mut().expect("lease handle present while held")
    }

    /// Move the handle out so it can be wrapped in a [`forge_engine::TaskContext`]
    /// and handed to the engine by value. Must be paired with [`Lease::put_handle`]
    /// before [`Lease::release`] — `release`/`Drop` both expect the handle present.
    pub fn take_handle(&mut self) -> InstanceHandle {
        self.handle.take().expect("lease handle present while held")
    }

    /// Return a handle previously removed with [`Lease::take_handle`].
    pub fn put_handle(&mut self, handle: InstanceHandle) {
        self.handle = Some(handle);
    }

    /// Build the cancellation controller for the one task this lease will
    /// run, merging the caller's own signal and timeout with the pool's
    /// shutdown watch (§4.3 dispatch contract step 4; §5 cancellation
    /// semantics, "pool shutdown").
    pub fn task_controller(
        &self,
        caller: Option<CancelSignal>,
        timeout: Option<Duration>,
    ) -> TaskController {
        TaskController::new_with_shutdown(caller, timeout, self.shutdown.clone())
    }

    /// Return the instance to the pool. Re-runs selection for the queue
    /// head and (re)starts the TTL timer (§4.4 release path).
    pub fn release(mut self, outcome: ReleaseOutcome) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: ReleaseOutcome) {
        if self.released {
            return;
        }
        self.released = true;
        let handle = self.handle.take().expect("lease handle present on release");
        let _ = self.pool_tx.send(PoolMessage::Release {
            instance_id: self.instance_id.clone(),
            handle,
            outcome,
        });
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(
                instance = %self.instance_id,
                "lease dropped without explicit release; returning instance as errored"
            );
            self.finish(ReleaseOutcome::Errored);
        }
    }
}
