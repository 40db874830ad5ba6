//! Steady-state checks while the method runs
//!
//! - [`ContinuousScheduler`]: a spawned task evaluating the hypothesis on a
//!   timer until stopped
//! - [`DuringCheck`]: a synchronous check the method runner calls after each
//!   activity
//!
//! Both record into a shared [`SteadyStateLedger`] and cancel the method on
//! deviation when fail-fast is set.

use crate::error::ControlError;
use crate::events::EventHandlerRegistry;
use crate::hypothesis::HypothesisEvaluator;
use crate::interruption::{CancelSignal, Halt};
use crate::journal::HypothesisResult;
use crate::types::Hypothesis;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct LedgerState {
    during: Vec<HypothesisResult>,
    deviated: bool,
    errored: bool,
}

/// During-method results plus the deviation and error flags
///
/// Every append and flag flip happens under one lock.
#[derive(Debug, Clone, Default)]
pub struct SteadyStateLedger {
    inner: Arc<Mutex<LedgerState>>,
}

impl SteadyStateLedger {
    /// Create empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a result; returns its 1-based iteration number
    pub fn record(&self, result: HypothesisResult) -> usize {
        let mut state = self.inner.lock();
        state.deviated |= result.deviated();
        state.errored |= result.errored();
        state.during.push(result);
        state.during.len()
    }

    /// Check if any recorded result deviated
    #[must_use]
    pub fn deviated(&self) -> bool {
        self.inner.lock().deviated
    }

    /// Check if any recorded evaluation errored
    #[must_use]
    pub fn errored(&self) -> bool {
        self.inner.lock().errored
    }

    /// Number of recorded results
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().during.len()
    }

    /// Check if nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().during.is_empty()
    }

    /// Copy of the recorded results, in order
    #[must_use]
    pub fn results(&self) -> Vec<HypothesisResult> {
        self.inner.lock().during.clone()
    }
}

/// Synchronous check between method activities
#[derive(Clone)]
pub struct DuringCheck {
    evaluator: HypothesisEvaluator,
    hypothesis: Hypothesis,
    ledger: SteadyStateLedger,
    fail_fast: bool,
    method_cancel: CancelSignal,
}

impl DuringCheck {
    /// Create check
    #[must_use]
    pub fn new(
        evaluator: HypothesisEvaluator,
        hypothesis: Hypothesis,
        ledger: SteadyStateLedger,
        fail_fast: bool,
        method_cancel: CancelSignal,
    ) -> Self {
        Self {
            evaluator,
            hypothesis,
            ledger,
            fail_fast,
            method_cancel,
        }
    }

    /// Evaluate once and apply the deviation policy
    ///
    /// # Errors
    /// A failing control hook
    pub async fn check(&self, halt: Option<&Halt>) -> Result<(), ControlError> {
        let result = self.evaluator.evaluate(&self.hypothesis, halt).await?;
        let deviated = result.deviated();
        let iteration = self.ledger.record(result);
        if deviated {
            warn!("Steady state deviated during method (check #{})", iteration);
            if self.fail_fast {
                info!("Fail-fast: cancelling remaining method activities");
                self.method_cancel.cancel();
            }
        }
        Ok(())
    }
}

/// Timer-driven hypothesis checks on a background task
pub struct ContinuousScheduler {
    evaluator: HypothesisEvaluator,
    hypothesis: Hypothesis,
    ledger: SteadyStateLedger,
    registry: Arc<EventHandlerRegistry>,
    frequency: Duration,
    fail_fast: bool,
    method_cancel: CancelSignal,
    halt: Halt,
}

impl ContinuousScheduler {
    /// Create scheduler; `halt` stops it, `method_cancel` is fired on
    /// fail-fast deviation
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        evaluator: HypothesisEvaluator,
        hypothesis: Hypothesis,
        ledger: SteadyStateLedger,
        registry: Arc<EventHandlerRegistry>,
        frequency: Duration,
        fail_fast: bool,
        method_cancel: CancelSignal,
        halt: Halt,
    ) -> Self {
        Self {
            evaluator,
            hypothesis,
            ledger,
            registry,
            frequency,
            fail_fast,
            method_cancel,
            halt,
        }
    }

    /// Spawn onto the runtime
    pub fn spawn(self) -> JoinHandle<Result<(), ControlError>> {
        tokio::spawn(self.run())
    }

    /// Loop until halted or a fail-fast deviation; the first check fires
    /// immediately
    ///
    /// # Errors
    /// A failing control hook; the method is cancelled first
    pub async fn run(self) -> Result<(), ControlError> {
        info!(
            "Continuous hypothesis checks every {:?} (fail_fast={})",
            self.frequency, self.fail_fast
        );
        loop {
            if self.halt.is_set() {
                break;
            }
            let result = match self.evaluator.evaluate(&self.hypothesis, Some(&self.halt)).await {
                Ok(result) => result,
                Err(e) => {
                    self.method_cancel.cancel();
                    return Err(e);
                }
            };
            let deviated = result.deviated();
            let iteration = self.ledger.record(result.clone());
            self.registry.continuous_hypothesis_iteration(iteration, &result);
            debug!("Continuous check #{}: {:?}", iteration, result.outcome);

            if deviated {
                warn!("Steady state deviated during continuous check #{}", iteration);
                if self.fail_fast {
                    info!("Fail-fast: cancelling remaining method activities");
                    self.method_cancel.cancel();
                    break;
                }
            }

            if !self.halt.sleep(self.frequency).await {
                break;
            }
        }
        debug!("Continuous scheduler stopped after {} checks", self.ledger.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::HypothesisOutcome;

    #[test]
    fn ledger_tracks_flags() {
        let ledger = SteadyStateLedger::new();
        assert!(ledger.is_empty());
        assert_eq!(ledger.record(HypothesisResult::new(HypothesisOutcome::Satisfied, vec![])), 1);
        assert!(!ledger.deviated());
        assert_eq!(ledger.record(HypothesisResult::new(HypothesisOutcome::Errored, vec![])), 2);
        assert!(ledger.errored() && !ledger.deviated());
        ledger.record(HypothesisResult::new(HypothesisOutcome::Deviated, vec![]));
        assert!(ledger.deviated());
        assert_eq!(ledger.results().len(), 3);
    }

    #[test]
    fn ledger_clones_share_state() {
        let ledger = SteadyStateLedger::new();
        let writer = ledger.clone();
        let handle = std::thread::spawn(move || {
            for _ in 0..100 {
                writer.record(HypothesisResult::new(HypothesisOutcome::Satisfied, vec![]));
            }
        });
        for _ in 0..100 {
            ledger.record(HypothesisResult::new(HypothesisOutcome::Satisfied, vec![]));
        }
        handle.join().unwrap();
        assert_eq!(ledger.len(), 200);
    }
}
