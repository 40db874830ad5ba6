//! Experiment executor
//!
//! Composes the hypothesis evaluator, the method and rollback runners, the
//! continuous scheduler and the interruption coordinator into one run:
//!
//! 1. `started`, `before_experiment` hooks
//! 2. before-method check (`default`, `before-method-only`)
//! 3. method, with during-method checks or the continuous scheduler
//! 4. cooldown
//! 5. after-method check (`default`, `after-method-only`), unless stopped
//! 6. rollbacks, per the rollback strategy
//! 7. status, `after_experiment` hooks, `interrupted` / `signal_exit`, `finish`
//!
//! Ordinary experiment failures end up in the [`Journal`]; only
//! configuration problems and failing controls are returned as errors.

use crate::activity::{ActivityContext, ActivityProvider, ActivityRunner, ProviderRegistry};
use crate::config::{Schedule, Settings, Strategy};
use crate::controls::{resolve_controls, Control, ControlCatalogue, HookInvoker};
use crate::error::{ControlError, ExperimentError};
use crate::events::EventHandlerRegistry;
use crate::hypothesis::{validate_hypothesis, HypothesisEvaluator};
use crate::interruption::{CancelSignal, Halt, InterruptionCoordinator, StopKind};
use crate::journal::{Journal, JournalStatus};
use crate::method::MethodRunner;
use crate::rollback::RollbackRunner;
use crate::scheduler::{ContinuousScheduler, DuringCheck, SteadyStateLedger};
use crate::types::{Experiment, Hypothesis};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Builder for [`Executor`]
#[derive(Default)]
pub struct ExecutorBuilder {
    providers: ProviderRegistry,
    controls: Vec<Arc<dyn Control>>,
    catalogue: ControlCatalogue,
    catch_ctrl_c: bool,
    stop_timeout: Option<Duration>,
}

impl ExecutorBuilder {
    /// Register an activity provider
    #[must_use]
    pub fn provider(mut self, provider_type: impl Into<String>, provider: Arc<dyn ActivityProvider>) -> Self {
        self.providers.register(provider_type, provider);
        self
    }

    /// Use a prepared provider registry
    #[must_use]
    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    /// Install a control applied to every run
    #[must_use]
    pub fn control(mut self, control: Arc<dyn Control>) -> Self {
        self.controls.push(control);
        self
    }

    /// Make a control available to experiments declaring `name`
    #[must_use]
    pub fn control_provider(mut self, name: impl Into<String>, control: Arc<dyn Control>) -> Self {
        self.catalogue.register(name, control);
        self
    }

    /// Turn Ctrl-C into an interrupt request while a run is active
    #[must_use]
    pub fn catch_ctrl_c(mut self, enabled: bool) -> Self {
        self.catch_ctrl_c = enabled;
        self
    }

    /// Bound on waiting for the continuous scheduler to stop; overrides
    /// `runtime.hypothesis.continuous_stop_timeout`
    #[must_use]
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = Some(timeout);
        self
    }

    /// Build executor
    #[must_use]
    pub fn build(self) -> Executor {
        Executor {
            providers: Arc::new(self.providers),
            controls: self.controls,
            catalogue: self.catalogue,
            catch_ctrl_c: self.catch_ctrl_c,
            stop_timeout: self.stop_timeout,
        }
    }
}

/// Runs experiments
///
/// Providers and controls are resolved once per run into a fixed table.
pub struct Executor {
    providers: Arc<ProviderRegistry>,
    controls: Vec<Arc<dyn Control>>,
    catalogue: ControlCatalogue,
    catch_ctrl_c: bool,
    stop_timeout: Option<Duration>,
}

impl Executor {
    /// Start building an executor
    #[must_use]
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::default()
    }

    /// Run an experiment
    ///
    /// # Errors
    /// `ExperimentError::Config` before anything runs, or
    /// `ExperimentError::Aborted` when a control hook fails
    pub async fn run(
        &self,
        experiment: Experiment,
        strategy: Strategy,
        schedule: &Schedule,
        settings: &Settings,
        registry: &EventHandlerRegistry,
    ) -> Result<Journal, ExperimentError> {
        self.run_with_coordinator(
            experiment,
            strategy,
            schedule,
            settings,
            registry,
            InterruptionCoordinator::new(),
        )
        .await
    }

    /// Run an experiment under a caller-supplied coordinator, so the caller
    /// can keep an [`InterruptHandle`](crate::interruption::InterruptHandle)
    ///
    /// # Errors
    /// Same as [`Executor::run`]
    pub async fn run_with_coordinator(
        &self,
        experiment: Experiment,
        strategy: Strategy,
        schedule: &Schedule,
        settings: &Settings,
        registry: &EventHandlerRegistry,
        coordinator: InterruptionCoordinator,
    ) -> Result<Journal, ExperimentError> {
        schedule.validate()?;
        self.providers.validate(&experiment)?;
        if let Some(hypothesis) = &experiment.steady_state_hypothesis {
            validate_hypothesis(hypothesis)?;
        }
        let controls = resolve_controls(&self.controls, &self.catalogue, &experiment)?;

        let run_id = Uuid::new_v4();
        info!(
            "Running experiment '{}' (strategy: {}, run: {})",
            experiment.title, strategy, run_id
        );

        let mut experiment = experiment;
        let mut journal = Journal::start(experiment.clone());
        journal.steady_states.during = strategy.runs_during().then(Vec::new);

        let registry = Arc::new(registry.clone());
        let hooks = Arc::new(HookInvoker::new(controls, coordinator.clone()));
        let ctrl_c = self.catch_ctrl_c.then(|| coordinator.listen_for_ctrl_c());

        let secrets = experiment.secrets.clone();
        let mut outcome = hooks.configure(&mut experiment, &secrets, settings).await;
        if outcome.is_ok() {
            let runner = ActivityRunner::new(
                Arc::clone(&self.providers),
                ActivityContext::for_experiment(&experiment),
                Arc::clone(&hooks),
                coordinator.clone(),
            )
            .with_dry_run(settings.runtime.dry);
            let run = ExperimentRun {
                strategy,
                schedule,
                settings,
                registry: Arc::clone(&registry),
                coordinator: coordinator.clone(),
                evaluator: HypothesisEvaluator::new(runner.clone()),
                runner,
                stop_timeout: self
                    .stop_timeout
                    .unwrap_or_else(|| settings.continuous_stop_timeout()),
            };
            outcome = run
                .drive(&mut experiment, &mut journal)
                .instrument(info_span!("experiment", run = %run_id))
                .await;
        }

        if let Some(listener) = ctrl_c {
            listener.abort();
        }
        hooks.cleanup().await;
        coordinator.finish();

        match outcome {
            Ok(()) => {
                journal.close();
                info!(
                    "Experiment '{}' ended with status: {} (deviated: {})",
                    journal.experiment.title, journal.status, journal.deviated
                );
                registry.finish(&journal);
                Ok(journal)
            }
            Err(source) => {
                error!("Experiment '{}' aborted: {}", experiment.title, source);
                journal.status = JournalStatus::Aborted;
                journal.close();
                registry.finish(&journal);
                Err(ExperimentError::Aborted {
                    source,
                    journal: Box::new(journal),
                })
            }
        }
    }
}

/// Run an experiment with the given providers and no controls
///
/// # Errors
/// Same as [`Executor::run`]
pub async fn run_experiment(
    experiment: Experiment,
    strategy: Strategy,
    schedule: &Schedule,
    settings: &Settings,
    registry: &EventHandlerRegistry,
    providers: ProviderRegistry,
) -> Result<Journal, ExperimentError> {
    Executor::builder()
        .providers(providers)
        .build()
        .run(experiment, strategy, schedule, settings, registry)
        .await
}

/// State of one run in progress
struct ExperimentRun<'a> {
    strategy: Strategy,
    schedule: &'a Schedule,
    settings: &'a Settings,
    registry: Arc<EventHandlerRegistry>,
    coordinator: InterruptionCoordinator,
    runner: ActivityRunner,
    evaluator: HypothesisEvaluator,
    stop_timeout: Duration,
}

impl ExperimentRun<'_> {
    async fn drive(&self, experiment: &mut Experiment, journal: &mut Journal) -> Result<(), ControlError> {
        self.registry.started(experiment, journal);
        self.runner.hooks().before_experiment(experiment).await?;
        journal.experiment = experiment.clone();

        let experiment: &Experiment = experiment;
        let hypothesis = experiment.steady_state_hypothesis.as_ref();
        let halt = Halt::new(self.coordinator.clone());

        let mut before_failed = false;
        if let (true, Some(hypothesis)) = (self.strategy.runs_before(), hypothesis) {
            if !self.coordinator.stop_requested() {
                self.registry.start_hypothesis_before(experiment);
                let state = self.evaluator.evaluate(hypothesis, Some(&halt)).await?;
                before_failed = !state.steady_state_met;
                let state = journal.steady_states.before.insert(state).clone();
                self.registry.hypothesis_before_completed(experiment, &state, journal);
                if before_failed {
                    warn!("Steady state not met before the method, skipping it");
                }
            }
        }

        let mut during_errored = false;
        if !before_failed && !self.coordinator.stop_requested() {
            during_errored = self.run_method(experiment, hypothesis, journal).await?;

            if let Some(cooldown) = self.schedule.cooldown() {
                if !self.coordinator.stop_requested() {
                    self.registry.start_cooldown(cooldown.as_secs_f64());
                    info!("Cooling down for {:?}", cooldown);
                    halt.sleep(cooldown).await;
                    self.registry.cooldown_completed();
                }
            }
        }

        let mut after_failed = false;
        if let (true, Some(hypothesis)) = (self.strategy.runs_after(), hypothesis) {
            if !before_failed && !self.coordinator.stop_requested() {
                self.registry.start_hypothesis_after(experiment);
                let state = self.evaluator.evaluate(hypothesis, Some(&halt)).await?;
                after_failed = !state.steady_state_met;
                let state = journal.steady_states.after.insert(state).clone();
                self.registry.hypothesis_after_completed(experiment, &state, journal);
            }
        }

        let failed = before_failed || after_failed || during_errored || journal.deviated;
        journal.status = self.status(failed);

        let rollbacks = RollbackRunner::new(self.runner.clone(), self.settings.rollback_strategy());
        if rollbacks.should_run(journal.deviated, failed || journal.method_failed()) {
            self.registry.start_rollbacks(experiment);
            journal.rollbacks = rollbacks.run(experiment).await?;
            self.registry.rollbacks_completed(experiment, journal);
        }

        journal.status = self.status(failed);
        self.runner.hooks().after_experiment(experiment, journal).await?;

        if let Some(request) = self.coordinator.stop_request() {
            match request.kind {
                StopKind::Interrupt => {
                    warn!("Experiment interrupted: {}", request.reason);
                    self.registry.interrupted(experiment, journal);
                }
                StopKind::Exit => {
                    warn!("Experiment exited: {}", request.reason);
                    self.registry.signal_exit();
                }
            }
        }
        Ok(())
    }

    /// Method phase; returns whether a during check errored
    async fn run_method(
        &self,
        experiment: &Experiment,
        hypothesis: Option<&Hypothesis>,
        journal: &mut Journal,
    ) -> Result<bool, ControlError> {
        let ledger = SteadyStateLedger::new();
        let method_cancel = CancelSignal::new();
        let method_halt = Halt::new(self.coordinator.clone()).with_cancel(method_cancel.clone());

        let during = match (self.strategy, hypothesis) {
            (Strategy::DuringMethod, Some(hypothesis)) => Some(DuringCheck::new(
                self.evaluator.clone(),
                hypothesis.clone(),
                ledger.clone(),
                self.schedule.fail_fast,
                method_cancel.clone(),
            )),
            _ => None,
        };

        let scheduler = match (self.strategy, hypothesis) {
            (Strategy::Continuous, Some(hypothesis)) => {
                self.registry
                    .start_continuous_hypothesis(self.schedule.continuous_hypothesis_frequency);
                let stop = CancelSignal::new();
                let handle = ContinuousScheduler::new(
                    self.evaluator.clone(),
                    hypothesis.clone(),
                    ledger.clone(),
                    Arc::clone(&self.registry),
                    self.schedule.frequency(),
                    self.schedule.fail_fast,
                    method_cancel.clone(),
                    Halt::new(self.coordinator.clone()).with_cancel(stop.clone()),
                )
                .spawn();
                Some((handle, stop))
            }
            _ => None,
        };
        let continuous = scheduler.is_some();

        self.registry.start_method(experiment);
        let method = MethodRunner::new(self.runner.clone(), method_halt)
            .with_during_check(during)
            .run(experiment)
            .await;

        let scheduled = match scheduler {
            Some((handle, stop)) => self.stop_scheduler(handle, &stop).await,
            None => Ok(()),
        };

        if self.strategy.runs_during() {
            journal.steady_states.during = Some(ledger.results());
        }
        journal.deviated = ledger.deviated();

        journal.run = method?;
        scheduled?;
        self.registry.method_completed(experiment, &journal.run);
        if continuous {
            self.registry.continuous_hypothesis_completed(experiment, journal);
        }
        Ok(ledger.errored())
    }

    async fn stop_scheduler(
        &self,
        mut handle: JoinHandle<Result<(), ControlError>>,
        stop: &CancelSignal,
    ) -> Result<(), ControlError> {
        stop.cancel();
        match tokio::time::timeout(self.stop_timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("Continuous scheduler task failed: {}", e);
                Ok(())
            }
            Err(_) => {
                warn!(
                    "Continuous scheduler did not stop within {:?}, abandoning it",
                    self.stop_timeout
                );
                handle.abort();
                Ok(())
            }
        }
    }

    fn status(&self, failed: bool) -> JournalStatus {
        if self.coordinator.stop_requested() {
            JournalStatus::Interrupted
        } else if failed {
            JournalStatus::Failed
        } else {
            JournalStatus::Completed
        }
    }
}
