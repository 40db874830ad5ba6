//! Controls: before/after hooks around each phase of a run
//!
//! A [`Control`] may annotate the run-scoped copies it is handed. Hook
//! failures propagate and abort the run; interrupt and exit signals raised by
//! a hook are routed to the [`InterruptionCoordinator`] instead.

use crate::config::Settings;
use crate::error::{ConfigError, ControlError};
use crate::interruption::InterruptionCoordinator;
use crate::journal::{HypothesisResult, Journal, Run};
use crate::types::{Activity, Configuration, Experiment, Hypothesis, Secrets};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Extension hooked into every phase of a run
///
/// Every hook defaults to a no-op.
#[allow(unused_variables)]
#[async_trait]
pub trait Control: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Called once before the run starts
    async fn configure(
        &self,
        experiment: &mut Experiment,
        configuration: &Configuration,
        secrets: &Secrets,
        settings: &Settings,
    ) -> Result<(), ControlError> {
        Ok(())
    }

    /// Called once after the run ends
    async fn cleanup(&self) -> Result<(), ControlError> {
        Ok(())
    }

    /// Before the whole run
    async fn before_experiment(&self, experiment: &mut Experiment) -> Result<(), ControlError> {
        Ok(())
    }

    /// After the whole run
    async fn after_experiment(
        &self,
        experiment: &Experiment,
        journal: &mut Journal,
    ) -> Result<(), ControlError> {
        Ok(())
    }

    /// Before each hypothesis evaluation
    async fn before_hypothesis(&self, hypothesis: &mut Hypothesis) -> Result<(), ControlError> {
        Ok(())
    }

    /// After each hypothesis evaluation
    async fn after_hypothesis(
        &self,
        hypothesis: &mut Hypothesis,
        state: &mut HypothesisResult,
    ) -> Result<(), ControlError> {
        Ok(())
    }

    /// Before the method
    async fn before_method(&self, experiment: &Experiment) -> Result<(), ControlError> {
        Ok(())
    }

    /// After the method
    async fn after_method(
        &self,
        experiment: &Experiment,
        runs: &mut Vec<Run>,
    ) -> Result<(), ControlError> {
        Ok(())
    }

    /// Before the rollbacks
    async fn before_rollback(&self, experiment: &Experiment) -> Result<(), ControlError> {
        Ok(())
    }

    /// After the rollbacks
    async fn after_rollback(
        &self,
        experiment: &Experiment,
        runs: &mut Vec<Run>,
    ) -> Result<(), ControlError> {
        Ok(())
    }

    /// Before each activity
    async fn before_activity(&self, activity: &mut Activity) -> Result<(), ControlError> {
        Ok(())
    }

    /// After each activity
    async fn after_activity(&self, activity: &mut Activity, run: &mut Run) -> Result<(), ControlError> {
        Ok(())
    }
}

/// Named controls an experiment may declare
#[derive(Clone, Default)]
pub struct ControlCatalogue {
    controls: HashMap<String, Arc<dyn Control>>,
}

impl ControlCatalogue {
    /// Create empty catalogue
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a control under `name`
    pub fn register(&mut self, name: impl Into<String>, control: Arc<dyn Control>) {
        self.controls.insert(name.into(), control);
    }

    /// Check if `name` is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.controls.contains_key(name)
    }

    /// Look up a control
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Control>> {
        self.controls.get(name).cloned()
    }

    /// Registered names
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.controls.keys().map(String::as_str).collect()
    }
}

/// A control resolved for one run, with the configuration it is handed
#[derive(Clone)]
pub struct ResolvedControl {
    /// The control
    pub control: Arc<dyn Control>,
    /// Configuration for `configure`
    pub configuration: Configuration,
}

/// Resolve global controls plus the experiment's declared controls
///
/// Global controls receive the experiment configuration; declared controls
/// receive their own.
///
/// # Errors
/// `ConfigError::UnknownControl` if a declared name is not in the catalogue
pub fn resolve_controls(
    globals: &[Arc<dyn Control>],
    catalogue: &ControlCatalogue,
    experiment: &Experiment,
) -> Result<Vec<ResolvedControl>, ConfigError> {
    let mut resolved: Vec<ResolvedControl> = globals
        .iter()
        .map(|control| ResolvedControl {
            control: Arc::clone(control),
            configuration: experiment.configuration.clone(),
        })
        .collect();
    for spec in &experiment.controls {
        let control = catalogue
            .get(&spec.name)
            .ok_or_else(|| ConfigError::UnknownControl(spec.name.clone()))?;
        resolved.push(ResolvedControl {
            control,
            configuration: spec.configuration.clone(),
        });
    }
    Ok(resolved)
}

/// Fixed table of controls invoked around each phase of one run
pub struct HookInvoker {
    controls: Vec<ResolvedControl>,
    coordinator: InterruptionCoordinator,
}

impl HookInvoker {
    /// Create invoker over resolved controls
    #[must_use]
    pub fn new(controls: Vec<ResolvedControl>, coordinator: InterruptionCoordinator) -> Self {
        Self {
            controls,
            coordinator,
        }
    }

    /// Invoker without controls
    #[must_use]
    pub fn empty(coordinator: InterruptionCoordinator) -> Self {
        Self::new(Vec::new(), coordinator)
    }

    /// Number of controls
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.controls.len()
    }

    /// Check if no control is installed
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    /// Route a hook result. `Ok(true)`: keep going; `Ok(false)`: the hook
    /// requested a stop, which was handed to the coordinator.
    fn settle(&self, hook: &str, control: &dyn Control, result: Result<(), ControlError>) -> Result<bool, ControlError> {
        match result {
            Ok(()) => Ok(true),
            Err(ControlError::Interrupted(reason)) => {
                self.coordinator.request_interrupt(reason);
                Ok(false)
            }
            Err(ControlError::Exit(reason)) => {
                self.coordinator.request_exit(reason);
                Ok(false)
            }
            Err(e) => {
                error!("Control '{}' failed in {}: {}", control.name(), hook, e);
                Err(e)
            }
        }
    }

    /// Configure every control
    ///
    /// # Errors
    /// The first hook failure
    pub async fn configure(
        &self,
        experiment: &mut Experiment,
        secrets: &Secrets,
        settings: &Settings,
    ) -> Result<(), ControlError> {
        for resolved in &self.controls {
            let control = resolved.control.as_ref();
            debug!("Configuring control '{}'", control.name());
            let result = control
                .configure(experiment, &resolved.configuration, secrets, settings)
                .await;
            if !self.settle("configure", control, result)? {
                break;
            }
        }
        Ok(())
    }

    /// Clean every control up; failures are logged, never returned
    pub async fn cleanup(&self) {
        for resolved in &self.controls {
            let control = resolved.control.as_ref();
            if let Err(e) = control.cleanup().await {
                warn!("Control '{}' failed to clean up: {}", control.name(), e);
            }
        }
    }

    /// Run `before_experiment` hooks
    ///
    /// # Errors
    /// The first hook failure
    pub async fn before_experiment(&self, experiment: &mut Experiment) -> Result<(), ControlError> {
        for resolved in &self.controls {
            let control = resolved.control.as_ref();
            let result = control.before_experiment(experiment).await;
            if !self.settle("before_experiment", control, result)? {
                break;
            }
        }
        Ok(())
    }

    /// Run `after_experiment` hooks
    ///
    /// # Errors
    /// The first hook failure
    pub async fn after_experiment(
        &self,
        experiment: &Experiment,
        journal: &mut Journal,
    ) -> Result<(), ControlError> {
        for resolved in &self.controls {
            let control = resolved.control.as_ref();
            let result = control.after_experiment(experiment, journal).await;
            if !self.settle("after_experiment", control, result)? {
                break;
            }
        }
        Ok(())
    }

    /// Run `before_hypothesis` hooks
    ///
    /// # Errors
    /// The first hook failure
    pub async fn before_hypothesis(&self, hypothesis: &mut Hypothesis) -> Result<(), ControlError> {
        for resolved in &self.controls {
            let control = resolved.control.as_ref();
            let result = control.before_hypothesis(hypothesis).await;
            if !self.settle("before_hypothesis", control, result)? {
                break;
            }
        }
        Ok(())
    }

    /// Run `after_hypothesis` hooks
    ///
    /// # Errors
    /// The first hook failure
    pub async fn after_hypothesis(
        &self,
        hypothesis: &mut Hypothesis,
        state: &mut HypothesisResult,
    ) -> Result<(), ControlError> {
        for resolved in &self.controls {
            let control = resolved.control.as_ref();
            let result = control.after_hypothesis(hypothesis, state).await;
            if !self.settle("after_hypothesis", control, result)? {
                break;
            }
        }
        Ok(())
    }

    /// Run `before_method` hooks
    ///
    /// # Errors
    /// The first hook failure
    pub async fn before_method(&self, experiment: &Experiment) -> Result<(), ControlError> {
        for resolved in &self.controls {
            let control = resolved.control.as_ref();
            let result = control.before_method(experiment).await;
            if !self.settle("before_method", control, result)? {
                break;
            }
        }
        Ok(())
    }

    /// Run `after_method` hooks
    ///
    /// # Errors
    /// The first hook failure
    pub async fn after_method(&self, experiment: &Experiment, runs: &mut Vec<Run>) -> Result<(), ControlError> {
        for resolved in &self.controls {
            let control = resolved.control.as_ref();
            let result = control.after_method(experiment, runs).await;
            if !self.settle("after_method", control, result)? {
                break;
            }
        }
        Ok(())
    }

    /// Run `before_rollback` hooks
    ///
    /// # Errors
    /// The first hook failure
    pub async fn before_rollback(&self, experiment: &Experiment) -> Result<(), ControlError> {
        for resolved in &self.controls {
            let control = resolved.control.as_ref();
            let result = control.before_rollback(experiment).await;
            if !self.settle("before_rollback", control, result)? {
                break;
            }
        }
        Ok(())
    }

    /// Run `after_rollback` hooks
    ///
    /// # Errors
    /// The first hook failure
    pub async fn after_rollback(&self, experiment: &Experiment, runs: &mut Vec<Run>) -> Result<(), ControlError> {
        for resolved in &self.controls {
            let control = resolved.control.as_ref();
            let result = control.after_rollback(experiment, runs).await;
            if !self.settle("after_rollback", control, result)? {
                break;
            }
        }
        Ok(())
    }

    /// Run `before_activity` hooks; `Ok(false)` means a hook requested a
    /// stop and the activity must not run
    ///
    /// # Errors
    /// The first hook failure
    pub async fn before_activity(&self, activity: &mut Activity) -> Result<bool, ControlError> {
        for resolved in &self.controls {
            let control = resolved.control.as_ref();
            let result = control.before_activity(activity).await;
            if !self.settle("before_activity", control, result)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Run `after_activity` hooks
    ///
    /// # Errors
    /// The first hook failure
    pub async fn after_activity(&self, activity: &mut Activity, run: &mut Run) -> Result<(), ControlError> {
        for resolved in &self.controls {
            let control = resolved.control.as_ref();
            let result = control.after_activity(activity, run).await;
            if !self.settle("after_activity", control, result)? {
                break;
            }
        }
        Ok(())
    }
}
