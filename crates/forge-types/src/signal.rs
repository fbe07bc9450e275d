use tokio::sync::watch;

/// The caller half of a cancel signal: held by whoever issued the task
/// (an HTTP handler watching for client disconnect, a `Task::cancel()`
/// call) and tripped at most once.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

/// The callee half: cloned into every layer that needs to observe
/// cancellation (pool, engine adapter) without owning the trigger.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

/// Build a caller signal/watch pair. One `CancelHandle` per task; the
/// matching `CancelSignal` is cloned freely.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelSignal(rx))
}

impl CancelHandle {
    /// Trip the signal. Idempotent; later calls are no-ops.
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the signal trips. Cancel-safe; fine to race in a
    /// `select!`.
    pub async fn cancelled(&mut self) {
        while !*self.0.borrow() {
            if self.0.changed().await.is_err() {
                // Sender dropped without ever cancelling — never resolves.
                std::future::pending::<()>().await;
            }
        }
    }
}
