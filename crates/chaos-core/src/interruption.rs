//! Interruption coordinator and cooperative cancellation
//!
//! Two stop-the-world requests exist: an operator interrupt and a forced
//! exit. Both stop the method and the continuous scheduler; they differ in
//! which notification the run emits at the end. The first request wins.
//!
//! ```text
//! Running ──> InterruptRequested ──> Stopped
//!    │                                  ^
//!    ├──────> ExitRequested ────────────┤
//!    └──────────────────────────────────┘
//! ```

use crate::error::IllegalTransition;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptionState {
    /// No stop requested
    Running,
    /// Operator interrupt received
    InterruptRequested,
    /// Forced exit received
    ExitRequested,
    /// Run finished
    Stopped,
}

/// Validate a state change
///
/// # Errors
/// `IllegalTransition` if `to` is not reachable from `from`
pub fn validate_transition(
    from: InterruptionState,
    to: InterruptionState,
) -> Result<(), IllegalTransition> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(IllegalTransition { from, to })
    }
}

/// States reachable from `from`
#[must_use]
pub fn allowed_transitions(from: InterruptionState) -> Vec<InterruptionState> {
    use InterruptionState::{ExitRequested, InterruptRequested, Running, Stopped};
    match from {
        Running => vec![InterruptRequested, ExitRequested, Stopped],
        InterruptRequested | ExitRequested => vec![Stopped],
        Stopped => vec![],
    }
}

/// Kind of stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopKind {
    /// Operator interrupt
    Interrupt,
    /// Forced exit
    Exit,
}

/// Accepted stop request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopRequest {
    /// Kind
    pub kind: StopKind,
    /// Who asked and why
    pub reason: String,
}

#[derive(Debug)]
struct Inner {
    state: watch::Sender<InterruptionState>,
    request: Mutex<Option<StopRequest>>,
}

/// Run-scoped interruption coordinator
///
/// Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct InterruptionCoordinator {
    inner: Arc<Inner>,
}

impl Default for InterruptionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptionCoordinator {
    /// Create coordinator in `Running`
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(InterruptionState::Running);
        Self {
            inner: Arc::new(Inner {
                state,
                request: Mutex::new(None),
            }),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> InterruptionState {
        *self.inner.state.borrow()
    }

    /// Request an interrupt; returns `false` if another request already won
    pub fn request_interrupt(&self, reason: impl Into<String>) -> bool {
        self.request(StopKind::Interrupt, reason.into())
    }

    /// Request a forced exit; returns `false` if another request already won
    pub fn request_exit(&self, reason: impl Into<String>) -> bool {
        self.request(StopKind::Exit, reason.into())
    }

    fn request(&self, kind: StopKind, reason: String) -> bool {
        let target = match kind {
            StopKind::Interrupt => InterruptionState::InterruptRequested,
            StopKind::Exit => InterruptionState::ExitRequested,
        };
        let accepted = self.inner.state.send_if_modified(|state| {
            if validate_transition(*state, target).is_err() {
                return false;
            }
            *self.inner.request.lock() = Some(StopRequest {
                kind,
                reason: reason.clone(),
            });
            *state = target;
            true
        });
        if accepted {
            info!("Stop requested ({:?}): {}", kind, reason);
        } else {
            debug!("Ignoring {:?} request, state is {:?}", kind, self.state());
        }
        accepted
    }

    /// Check if an interrupt or exit was requested
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.inner.request.lock().is_some()
    }

    /// The winning stop request, if any
    #[must_use]
    pub fn stop_request(&self) -> Option<StopRequest> {
        self.inner.request.lock().clone()
    }

    /// Mark the run finished
    pub fn finish(&self) {
        self.inner.state.send_if_modified(|state| {
            if validate_transition(*state, InterruptionState::Stopped).is_ok() {
                *state = InterruptionState::Stopped;
                true
            } else {
                false
            }
        });
    }

    /// Resolve once the coordinator leaves `Running`
    pub async fn stopped(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|s| *s != InterruptionState::Running).await;
    }

    /// Handle for code outside the run
    #[must_use]
    pub fn handle(&self) -> InterruptHandle {
        InterruptHandle {
            coordinator: self.clone(),
        }
    }

    /// Turn Ctrl-C into an interrupt request until the run finishes
    pub fn listen_for_ctrl_c(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                received = tokio::signal::ctrl_c() => {
                    if received.is_ok() {
                        coordinator.request_interrupt("keyboard interrupt");
                    }
                }
                () = coordinator.stopped() => {}
            }
        })
    }
}

/// Handle for requesting a stop from outside the run
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    coordinator: InterruptionCoordinator,
}

impl InterruptHandle {
    /// Request an interrupt
    pub fn interrupt(&self, reason: impl Into<String>) -> bool {
        self.coordinator.request_interrupt(reason)
    }

    /// Request a forced exit
    pub fn exit(&self, reason: impl Into<String>) -> bool {
        self.coordinator.request_exit(reason)
    }

    /// Current coordinator state
    #[must_use]
    pub fn state(&self) -> InterruptionState {
        self.coordinator.state()
    }
}

/// One-shot cooperative cancellation flag
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    /// Create an unset signal
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the signal
    pub fn cancel(&self) {
        self.tx.send_if_modified(|cancelled| !std::mem::replace(cancelled, true));
    }

    /// Check if set
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once set
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|c| *c).await;
    }
}

/// Stop condition of one execution unit: its own cancel signal or a
/// coordinator stop request, whichever comes first
#[derive(Debug, Clone)]
pub struct Halt {
    cancel: CancelSignal,
    coordinator: InterruptionCoordinator,
}

impl Halt {
    /// Halt on coordinator stop or a fresh cancel signal
    #[must_use]
    pub fn new(coordinator: InterruptionCoordinator) -> Self {
        Self {
            cancel: CancelSignal::new(),
            coordinator,
        }
    }

    /// Use an existing cancel signal
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Check if halted
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.cancel.is_cancelled() || self.coordinator.stop_requested()
    }

    /// Resolve once halted
    pub async fn wait(&self) {
        tokio::select! {
            () = self.cancel.cancelled() => {}
            () = self.coordinator.stopped() => {}
        }
    }

    /// Sleep for `duration` unless halted first; returns `false` if cut short
    pub async fn sleep(&self, duration: std::time::Duration) -> bool {
        if self.is_set() {
            return false;
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => true,
            () = self.wait() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_request_wins() {
        let coordinator = InterruptionCoordinator::new();
        assert!(coordinator.request_exit("control"));
        assert!(!coordinator.request_interrupt("operator"));
        assert_eq!(coordinator.state(), InterruptionState::ExitRequested);
        assert_eq!(coordinator.stop_request().unwrap().kind, StopKind::Exit);
    }

    #[test]
    fn finish_keeps_the_request() {
        let coordinator = InterruptionCoordinator::new();
        coordinator.handle().interrupt("operator");
        coordinator.finish();
        assert_eq!(coordinator.state(), InterruptionState::Stopped);
        assert!(coordinator.stop_requested());
        assert!(!coordinator.request_exit("late"));
    }

    #[test]
    fn stopped_is_terminal() {
        assert!(allowed_transitions(InterruptionState::Stopped).is_empty());
        assert!(validate_transition(InterruptionState::Running, InterruptionState::Stopped).is_ok());
        assert!(validate_transition(
            InterruptionState::InterruptRequested,
            InterruptionState::ExitRequested
        )
        .is_err());
    }

    #[tokio::test]
    async fn ctrl_c_listener_ends_when_run_finishes() {
        let coordinator = InterruptionCoordinator::new();
        let listener = coordinator.listen_for_ctrl_c();
        assert!(!listener.is_finished());

        coordinator.finish();
        tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .expect("listener did not stop")
            .unwrap();
        assert!(!coordinator.stop_requested());
    }

    #[tokio::test]
    async fn ctrl_c_listener_ends_on_other_stop_request() {
        let coordinator = InterruptionCoordinator::new();
        let listener = coordinator.listen_for_ctrl_c();

        coordinator.request_exit("control");
        tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .expect("listener did not stop")
            .unwrap();
        assert_eq!(coordinator.stop_request().unwrap().kind, StopKind::Exit);
    }

    #[tokio::test(start_paused = true)]
    async fn halt_cuts_sleep_short() {
        let coordinator = InterruptionCoordinator::new();
        let halt = Halt::new(coordinator.clone());
        let sleeper = {
            let halt = halt.clone();
            tokio::spawn(async move { halt.sleep(Duration::from_secs(60)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.request_interrupt("operator");
        assert!(!sleeper.await.unwrap());
        assert!(halt.is_set());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_signal_wakes_waiters() {
        let cancel = CancelSignal::new();
        let halt = Halt::new(InterruptionCoordinator::new()).with_cancel(cancel.clone());
        assert!(halt.sleep(Duration::from_millis(5)).await);

        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move { cancel.cancelled().await })
        };
        cancel.cancel();
        waiter.await.unwrap();
        assert!(halt.is_set());
    }
}
