use std::time::Duration;

use forge_types::CancelSignal;
use tokio::sync::watch;

/// Why a task was cut short before it produced a result (§4.3 dispatch
/// contract, steps 4/6/7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// The caller's own signal tripped — `Task::cancel()`, client
    /// disconnect.
    Caller,
    /// The pool tripped its internal button — eviction, instance disposal,
    /// or `Pool::dispose()`.
    Button,
    /// The per-task deadline elapsed.
    Timeout,
}

/// A read-only merge of the three cancellation sources named in the
/// dispatch contract. Cheap to clone; every layer that needs to observe
/// cancellation gets its own handle.
#[derive(Clone)]
pub struct CancelToken {
    caller: Option<CancelSignal>,
    button: watch::Receiver<bool>,
    /// Pool-wide shutdown watch, present when this token was built by
    /// [`TaskController::new_with_shutdown`]. Shares `CancelCause::Button`
    /// with the per-task button — both represent the pool cutting a task
    /// short for reasons the caller never asked for.
    shutdown: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token that never trips — for call sites that accept an optional
    /// cancel token and were handed none.
    pub fn inert() -> Self {
        let (tx, rx) = watch::channel(false);
        // Leaked deliberately: this token's button must never close, or
        // `cancelled()` would resolve immediately once the sender drops.
        std::mem::forget(tx);
        Self {
            caller: None,
            button: rx,
            shutdown: None,
        }
    }

    /// Build a standalone token driven by a single pool-owned watch —
    /// used outside of per-task dispatch (model preparation, instance
    /// load) where there's no caller signal or timeout, only the pool's
    /// shutdown button.
    pub fn from_button(button: watch::Receiver<bool>) -> Self {
        Self {
            caller: None,
            button,
            shutdown: None,
        }
    }

    fn shutdown_tripped(&self) -> bool {
        self.shutdown.as_ref().map(|s| *s.borrow()).unwrap_or(false)
    }

    pub fn is_cancelled(&self) -> bool {
        self.caller
            .as_ref()
            .map(CancelSignal::is_cancelled)
            .unwrap_or(false)
            || *self.button.borrow()
            || self.shutdown_tripped()
    }

    pub fn cause(&self) -> Option<CancelCause> {
        if self
            .caller
            .as_ref()
            .map(CancelSignal::is_cancelled)
            .unwrap_or(false)
        {
            Some(CancelCause::Caller)
        } else if *self.button.borrow() || self.shutdown_tripped() {
            Some(CancelCause::Button)
        } else {
            None
        }
    }

    /// Resolves once any source trips. Engines await this in a
    /// `tokio::select!` alongside their own generation loop when they
    /// manage cancellation themselves instead of going through
    /// [`TaskController::race`].
    pub async fn cancelled(&mut self) -> CancelCause {
        let mut button = self.button.clone();
        let mut shutdown = self.shutdown.clone();
        let shutdown_fut = async {
            match &mut shutdown {
                Some(s) => {
                    let _ = s.changed().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        match &mut self.caller {
            Some(caller) => {
                tokio::select! {
                    _ = caller.cancelled() => CancelCause::Caller,
                    _ = button.changed() => CancelCause::Button,
                    _ = shutdown_fut => CancelCause::Button,
                }
            }
            None => {
                tokio::select! {
                    _ = button.changed() => CancelCause::Button,
                    _ = shutdown_fut => CancelCause::Button,
                }
            }
        }
    }
}

/// Owns the internal cancel button and the optional timeout for one
/// dispatched task, and hands out [`CancelToken`]s to the engine. Built
/// fresh per task by the pool before it calls into the engine adapter.
pub struct TaskController {
    token: CancelToken,
    button_tx: watch::Sender<bool>,
    timeout: Option<Duration>,
}

impl TaskController {
    pub fn new(caller: Option<CancelSignal>, timeout: Option<Duration>) -> Self {
        let (button_tx, button_rx) = watch::channel(false);
        Self {
            token: CancelToken {
                caller,
                button: button_rx,
                shutdown: None,
            },
            button_tx,
            timeout,
        }
    }

    /// Same as [`TaskController::new`], additionally wired to a pool-wide
    /// shutdown watch so `Pool::dispose()` cancels every outstanding task
    /// without the pool needing to reach into each one individually.
    pub fn new_with_shutdown(
        caller: Option<CancelSignal>,
        timeout: Option<Duration>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (button_tx, button_rx) = watch::channel(false);
        Self {
            token: CancelToken {
                caller,
                button: button_rx,
                shutdown: Some(shutdown),
            },
            button_tx,
            timeout,
        }
    }

    /// Trip the internal button: pool eviction, instance disposal, or a
    /// whole-pool shutdown reaching this task.
    pub fn press_button(&self) {
        let _ = self.button_tx.send(true);
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Race `fut` against every cancellation source. `Ok` means `fut` won;
    /// `Err` carries whichever cause tripped first, for the caller to
    /// rewrite a `finishReason` (success path) or map to a `CoreError`
    /// (failure path).
    pub async fn race<F, T>(&self, fut: F) -> Result<T, CancelCause>
    where
        F: std::future::Future<Output = T>,
    {
        let mut token = self.token();
        match self.timeout {
            Some(dur) => {
                tokio::select! {
                    biased;
                    cause = token.cancelled() => Err(cause),
                    _ = tokio::time::sleep(dur) => Err(CancelCause::Timeout),
                    out = fut => Ok(out),
                }
            }
            None => {
                tokio::select! {
                    biased;
                    cause = token.cancelled() => Err(cause),
                    out = fut => Ok(out),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fut_wins_when_nothing_trips() {
        let controller = TaskController::new(None, None);
        assert_eq!(controller.race(async { 42 }).await, Ok(42));
    }

    #[tokio::test]
    async fn button_press_short_circuits() {
        let controller = TaskController::new(None, None);
        let race = controller.race(std::future::pending::<()>());
        controller.press_button();
        assert_eq!(race.await, Err(CancelCause::Button));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_short_circuits() {
        let controller = TaskController::new(None, Some(Duration::from_millis(10)));
        let race = controller.race(std::future::pending::<()>());
        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(race.await, Err(CancelCause::Timeout));
    }

    #[tokio::test]
    async fn caller_signal_short_circuits() {
        let (handle, signal) = forge_types::cancel_pair();
        let controller = TaskController::new(Some(signal), None);
        let race = controller.race(std::future::pending::<()>());
        handle.cancel();
        assert_eq!(race.await, Err(CancelCause::Caller));
    }
}
