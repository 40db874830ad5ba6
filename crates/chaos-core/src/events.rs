//! Run lifecycle notifications
//!
//! [`RunEventHandler`] is the observer capability; [`EventHandlerRegistry`]
//! fans each event out to every registered handler in registration order.
//! A handler that returns an error or panics is logged and skipped; it never
//! affects the run or the other handlers.

use crate::error::HandlerError;
use crate::journal::{HypothesisResult, Journal, Run};
use crate::types::Experiment;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Observer of run lifecycle events
///
/// Every callback defaults to a no-op.
#[allow(unused_variables)]
pub trait RunEventHandler: Send + Sync {
    /// Run started
    fn started(&self, experiment: &Experiment, journal: &Journal) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Run finished, journal finalized
    fn finish(&self, journal: &Journal) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Run stopped by an interrupt
    fn interrupted(&self, experiment: &Experiment, journal: &Journal) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Run stopped by a forced exit
    fn signal_exit(&self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Continuous scheduler starting
    fn start_continuous_hypothesis(&self, frequency: f64) -> Result<(), HandlerError> {
        Ok(())
    }

    /// One continuous check evaluated (iterations count from 1)
    fn continuous_hypothesis_iteration(
        &self,
        iteration: usize,
        state: &HypothesisResult,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Continuous scheduler stopped
    fn continuous_hypothesis_completed(
        &self,
        experiment: &Experiment,
        journal: &Journal,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Method starting
    fn start_method(&self, experiment: &Experiment) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Method finished
    fn method_completed(&self, experiment: &Experiment, runs: &[Run]) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Rollbacks starting
    fn start_rollbacks(&self, experiment: &Experiment) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Rollbacks finished
    fn rollbacks_completed(&self, experiment: &Experiment, journal: &Journal) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Before-method check starting
    fn start_hypothesis_before(&self, experiment: &Experiment) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Before-method check finished
    fn hypothesis_before_completed(
        &self,
        experiment: &Experiment,
        state: &HypothesisResult,
        journal: &Journal,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    /// After-method check starting
    fn start_hypothesis_after(&self, experiment: &Experiment) -> Result<(), HandlerError> {
        Ok(())
    }

    /// After-method check finished
    fn hypothesis_after_completed(
        &self,
        experiment: &Experiment,
        state: &HypothesisResult,
        journal: &Journal,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Cooldown starting
    fn start_cooldown(&self, duration: f64) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Cooldown finished
    fn cooldown_completed(&self) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Ordered set of event handlers
#[derive(Clone, Default)]
pub struct EventHandlerRegistry {
    handlers: Vec<Arc<dyn RunEventHandler>>,
}

impl std::fmt::Debug for EventHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlerRegistry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl EventHandlerRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler
    pub fn register(&mut self, handler: Arc<dyn RunEventHandler>) {
        self.handlers.push(handler);
    }

    /// With a handler appended
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn RunEventHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Number of handlers
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handler is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn dispatch<F>(&self, event: &'static str, call: F)
    where
        F: Fn(&dyn RunEventHandler) -> Result<(), HandlerError>,
    {
        for (index, handler) in self.handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| call(handler.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Event handler #{} failed on '{}': {:#}", index, event, e),
                Err(_) => warn!("Event handler #{} panicked on '{}'", index, event),
            }
        }
    }

    /// Dispatch `started`
    pub fn started(&self, experiment: &Experiment, journal: &Journal) {
        self.dispatch("started", |h| h.started(experiment, journal));
    }

    /// Dispatch `finish`
    pub fn finish(&self, journal: &Journal) {
        self.dispatch("finish", |h| h.finish(journal));
    }

    /// Dispatch `interrupted`
    pub fn interrupted(&self, experiment: &Experiment, journal: &Journal) {
        self.dispatch("interrupted", |h| h.interrupted(experiment, journal));
    }

    /// Dispatch `signal_exit`
    pub fn signal_exit(&self) {
        self.dispatch("signal_exit", |h| h.signal_exit());
    }

    /// Dispatch `start_continuous_hypothesis`
    pub fn start_continuous_hypothesis(&self, frequency: f64) {
        self.dispatch("start_continuous_hypothesis", |h| {
            h.start_continuous_hypothesis(frequency)
        });
    }

    /// Dispatch `continuous_hypothesis_iteration`
    pub fn continuous_hypothesis_iteration(&self, iteration: usize, state: &HypothesisResult) {
        self.dispatch("continuous_hypothesis_iteration", |h| {
            h.continuous_hypothesis_iteration(iteration, state)
        });
    }

    /// Dispatch `continuous_hypothesis_completed`
    pub fn continuous_hypothesis_completed(&self, experiment: &Experiment, journal: &Journal) {
        self.dispatch("continuous_hypothesis_completed", |h| {
            h.continuous_hypothesis_completed(experiment, journal)
        });
    }

    /// Dispatch `start_method`
    pub fn start_method(&self, experiment: &Experiment) {
        self.dispatch("start_method", |h| h.start_method(experiment));
    }

    /// Dispatch `method_completed`
    pub fn method_completed(&self, experiment: &Experiment, runs: &[Run]) {
        self.dispatch("method_completed", |h| h.method_completed(experiment, runs));
    }

    /// Dispatch `start_rollbacks`
    pub fn start_rollbacks(&self, experiment: &Experiment) {
        self.dispatch("start_rollbacks", |h| h.start_rollbacks(experiment));
    }

    /// Dispatch `rollbacks_completed`
    pub fn rollbacks_completed(&self, experiment: &Experiment, journal: &Journal) {
        self.dispatch("rollbacks_completed", |h| {
            h.rollbacks_completed(experiment, journal)
        });
    }

    /// Dispatch `start_hypothesis_before`
    pub fn start_hypothesis_before(&self, experiment: &Experiment) {
        self.dispatch("start_hypothesis_before", |h| {
            h.start_hypothesis_before(experiment)
        });
    }

    /// Dispatch `hypothesis_before_completed`
    pub fn hypothesis_before_completed(
        &self,
        experiment: &Experiment,
        state: &HypothesisResult,
        journal: &Journal,
    ) {
        self.dispatch("hypothesis_before_completed", |h| {
            h.hypothesis_before_completed(experiment, state, journal)
        });
    }

    /// Dispatch `start_hypothesis_after`
    pub fn start_hypothesis_after(&self, experiment: &Experiment) {
        self.dispatch("start_hypothesis_after", |h| {
            h.start_hypothesis_after(experiment)
        });
    }

    /// Dispatch `hypothesis_after_completed`
    pub fn hypothesis_after_completed(
        &self,
        experiment: &Experiment,
        state: &HypothesisResult,
        journal: &Journal,
    ) {
        self.dispatch("hypothesis_after_completed", |h| {
            h.hypothesis_after_completed(experiment, state, journal)
        });
    }

    /// Dispatch `start_cooldown`
    pub fn start_cooldown(&self, duration: f64) {
        self.dispatch("start_cooldown", |h| h.start_cooldown(duration));
    }

    /// Dispatch `cooldown_completed`
    pub fn cooldown_completed(&self) {
        self.dispatch("cooldown_completed", |h| h.cooldown_completed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Seen(Mutex<Vec<&'static str>>);

    impl RunEventHandler for Seen {
        fn started(&self, _: &Experiment, _: &Journal) -> Result<(), HandlerError> {
            self.0.lock().push("started");
            Ok(())
        }

        fn signal_exit(&self) -> Result<(), HandlerError> {
            self.0.lock().push("signal_exit");
            Ok(())
        }
    }

    struct Broken;

    impl RunEventHandler for Broken {
        fn started(&self, _: &Experiment, _: &Journal) -> Result<(), HandlerError> {
            anyhow::bail!("observer is down")
        }

        fn signal_exit(&self) -> Result<(), HandlerError> {
            panic!("observer crashed")
        }
    }

    #[test]
    fn faulty_handler_does_not_block_the_next_one() {
        let seen = Arc::new(Seen::default());
        let registry = EventHandlerRegistry::new()
            .with_handler(Arc::new(Broken))
            .with_handler(seen.clone());

        let experiment = Experiment::new("isolation");
        let journal = Journal::start(experiment.clone());
        registry.started(&experiment, &journal);
        registry.signal_exit();
        registry.cooldown_completed();

        assert_eq!(*seen.0.lock(), vec!["started", "signal_exit"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn empty_registry_is_a_no_op() {
        let registry = EventHandlerRegistry::new();
        assert!(registry.is_empty());
        registry.signal_exit();
        registry.start_cooldown(1.0);
    }
}
