//! Testing utilities for the chaos engine workspace
//!
//! Scripted providers, canned experiments, recording and failing event
//! handlers, sample controls.

#![allow(missing_docs)]

use async_trait::async_trait;
use chaos_core::{
    Activity, ActivityContext, ActivityFailure, ActivityProvider, Configuration, Control,
    ControlError, Executor, Experiment, HandlerError, Hypothesis, HypothesisResult, Journal, Run,
    RunEventHandler, Schedule, Secrets, Settings, Tolerance,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Provider type every fixture activity uses
pub const PROVIDER: &str = "scripted";

pub const STEADY_PROBE: &str = "steady-state";
pub const FIRST_ACTION: &str = "inject-latency";
pub const SECOND_ACTION: &str = "kill-replica";
pub const ROLLBACK_ACTION: &str = "restore-replica";

/// How long each fixture action takes
pub const ACTION_DURATION: Duration = Duration::from_millis(500);

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Return(Value),
    Fail(String),
    Interrupt(String),
    Exit(String),
    /// Never answer
    Hang,
}

impl Step {
    async fn outcome(self) -> Result<Value, ActivityFailure> {
        match self {
            Self::Return(value) => Ok(value),
            Self::Fail(message) => Err(ActivityFailure::Failed(message)),
            Self::Interrupt(reason) => Err(ActivityFailure::Interrupted(reason)),
            Self::Exit(reason) => Err(ActivityFailure::Exit(reason)),
            Self::Hang => std::future::pending().await,
        }
    }
}

#[derive(Debug, Clone)]
struct Behaviour {
    queued: VecDeque<Step>,
    then: Step,
    delay: Duration,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            queued: VecDeque::new(),
            then: Step::Return(Value::Bool(true)),
            delay: Duration::ZERO,
        }
    }
}

/// Provider answering per activity name from a script
///
/// Unscripted activities return `true` immediately.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    behaviours: Mutex<HashMap<String, Behaviour>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `step`
    pub fn respond(self, activity: &str, step: Step) -> Self {
        self.behaviours.lock().entry(activity.to_string()).or_default().then = step;
        self
    }

    /// Answer `steps` in order, then `then` forever
    pub fn sequence(self, activity: &str, steps: Vec<Step>, then: Step) -> Self {
        {
            let mut behaviours = self.behaviours.lock();
            let behaviour = behaviours.entry(activity.to_string()).or_default();
            behaviour.queued = steps.into();
            behaviour.then = then;
        }
        self
    }

    /// Take `delay` before answering
    pub fn delay(self, activity: &str, delay: Duration) -> Self {
        self.behaviours.lock().entry(activity.to_string()).or_default().delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, activity: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == activity).count()
    }
}

#[async_trait]
impl ActivityProvider for ScriptedProvider {
    async fn execute(&self, activity: &Activity, _: &ActivityContext) -> Result<Value, ActivityFailure> {
        self.calls.lock().push(activity.name.clone());
        let (step, delay) = {
            let mut behaviours = self.behaviours.lock();
            let behaviour = behaviours.entry(activity.name.clone()).or_default();
            let step = behaviour
                .queued
                .pop_front()
                .unwrap_or_else(|| behaviour.then.clone());
            (step, behaviour.delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        step.outcome().await
    }
}

/// Healthy system: the steady state always holds, actions take
/// [`ACTION_DURATION`]
pub fn healthy_provider() -> ScriptedProvider {
    ScriptedProvider::new()
        .delay(FIRST_ACTION, ACTION_DURATION)
        .delay(SECOND_ACTION, ACTION_DURATION)
}

/// The steady state holds for `healthy_checks` evaluations, then deviates
pub fn provider_with_steady_state_failing_after(healthy_checks: usize) -> ScriptedProvider {
    healthy_provider().sequence(
        STEADY_PROBE,
        vec![Step::Return(Value::Bool(true)); healthy_checks],
        Step::Return(Value::Bool(false)),
    )
}

// ---------------------------------------------------------------------------
// Experiments
// ---------------------------------------------------------------------------

pub fn steady_state_hypothesis() -> Hypothesis {
    Hypothesis::new("system is healthy")
        .with_probe(Activity::probe(STEADY_PROBE, PROVIDER).with_tolerance(Tolerance::exact(json!(true))))
}

/// Hypothesis, two sequential actions, one rollback
pub fn experiment() -> Experiment {
    Experiment::new("replica loss is tolerated")
        .with_description("kills a replica while the service is under latency")
        .with_hypothesis(steady_state_hypothesis())
        .with_activity(Activity::action(FIRST_ACTION, PROVIDER))
        .with_activity(Activity::action(SECOND_ACTION, PROVIDER))
        .with_rollback(Activity::action(ROLLBACK_ACTION, PROVIDER))
}

/// Same as [`experiment`] with the first action in the background
pub fn experiment_with_background_activity() -> Experiment {
    let mut experiment = experiment();
    experiment.method[0].background = true;
    experiment
}

pub fn experiment_without_method() -> Experiment {
    let mut experiment = experiment();
    experiment.method.clear();
    experiment
}

/// Continuous checks every 100ms
pub fn fast_schedule() -> Schedule {
    Schedule::new().with_frequency(0.1)
}

pub fn executor(provider: ScriptedProvider) -> Executor {
    Executor::builder().provider(PROVIDER, Arc::new(provider)).build()
}

pub fn executor_with_control(provider: ScriptedProvider, control: Arc<dyn Control>) -> Executor {
    Executor::builder()
        .provider(PROVIDER, Arc::new(provider))
        .control(control)
        .build()
}

// ---------------------------------------------------------------------------
// Event handlers
// ---------------------------------------------------------------------------

/// Every event, in dispatch order
pub const ALL_EVENTS: [&str; 17] = [
    "started",
    "finish",
    "interrupted",
    "signal_exit",
    "start_continuous_hypothesis",
    "continuous_hypothesis_iteration",
    "continuous_hypothesis_completed",
    "start_method",
    "method_completed",
    "start_rollbacks",
    "rollbacks_completed",
    "start_hypothesis_before",
    "hypothesis_before_completed",
    "start_hypothesis_after",
    "hypothesis_after_completed",
    "start_cooldown",
    "cooldown_completed",
];

/// Records the name of every event it receives
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<&'static str>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| **e == event).count()
    }

    pub fn saw(&self, event: &str) -> bool {
        self.count(event) > 0
    }

    fn hit(&self, event: &'static str) -> Result<(), HandlerError> {
        self.events.lock().push(event);
        Ok(())
    }
}

impl RunEventHandler for RecordingHandler {
    fn started(&self, _: &Experiment, _: &Journal) -> Result<(), HandlerError> {
        self.hit("started")
    }
    fn finish(&self, _: &Journal) -> Result<(), HandlerError> {
        self.hit("finish")
    }
    fn interrupted(&self, _: &Experiment, _: &Journal) -> Result<(), HandlerError> {
        self.hit("interrupted")
    }
    fn signal_exit(&self) -> Result<(), HandlerError> {
        self.hit("signal_exit")
    }
    fn start_continuous_hypothesis(&self, _: f64) -> Result<(), HandlerError> {
        self.hit("start_continuous_hypothesis")
    }
    fn continuous_hypothesis_iteration(&self, _: usize, _: &HypothesisResult) -> Result<(), HandlerError> {
        self.hit("continuous_hypothesis_iteration")
    }
    fn continuous_hypothesis_completed(&self, _: &Experiment, _: &Journal) -> Result<(), HandlerError> {
        self.hit("continuous_hypothesis_completed")
    }
    fn start_method(&self, _: &Experiment) -> Result<(), HandlerError> {
        self.hit("start_method")
    }
    fn method_completed(&self, _: &Experiment, _: &[Run]) -> Result<(), HandlerError> {
        self.hit("method_completed")
    }
    fn start_rollbacks(&self, _: &Experiment) -> Result<(), HandlerError> {
        self.hit("start_rollbacks")
    }
    fn rollbacks_completed(&self, _: &Experiment, _: &Journal) -> Result<(), HandlerError> {
        self.hit("rollbacks_completed")
    }
    fn start_hypothesis_before(&self, _: &Experiment) -> Result<(), HandlerError> {
        self.hit("start_hypothesis_before")
    }
    fn hypothesis_before_completed(&self, _: &Experiment, _: &HypothesisResult, _: &Journal) -> Result<(), HandlerError> {
        self.hit("hypothesis_before_completed")
    }
    fn start_hypothesis_after(&self, _: &Experiment) -> Result<(), HandlerError> {
        self.hit("start_hypothesis_after")
    }
    fn hypothesis_after_completed(&self, _: &Experiment, _: &HypothesisResult, _: &Journal) -> Result<(), HandlerError> {
        self.hit("hypothesis_after_completed")
    }
    fn start_cooldown(&self, _: f64) -> Result<(), HandlerError> {
        self.hit("start_cooldown")
    }
    fn cooldown_completed(&self) -> Result<(), HandlerError> {
        self.hit("cooldown_completed")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Error,
    Panic,
}

/// Fails on every event
#[derive(Debug)]
pub struct FailingHandler {
    mode: FailureMode,
}

impl FailingHandler {
    pub fn new(mode: FailureMode) -> Arc<Self> {
        Arc::new(Self { mode })
    }

    fn fail(&self, event: &str) -> Result<(), HandlerError> {
        match self.mode {
            FailureMode::Error => Err(anyhow::anyhow!("handler refused '{event}'")),
            FailureMode::Panic => panic!("handler crashed on '{event}'"),
        }
    }
}

impl RunEventHandler for FailingHandler {
    fn started(&self, _: &Experiment, _: &Journal) -> Result<(), HandlerError> {
        self.fail("started")
    }
    fn finish(&self, _: &Journal) -> Result<(), HandlerError> {
        self.fail("finish")
    }
    fn interrupted(&self, _: &Experiment, _: &Journal) -> Result<(), HandlerError> {
        self.fail("interrupted")
    }
    fn signal_exit(&self) -> Result<(), HandlerError> {
        self.fail("signal_exit")
    }
    fn start_continuous_hypothesis(&self, _: f64) -> Result<(), HandlerError> {
        self.fail("start_continuous_hypothesis")
    }
    fn continuous_hypothesis_iteration(&self, _: usize, _: &HypothesisResult) -> Result<(), HandlerError> {
        self.fail("continuous_hypothesis_iteration")
    }
    fn continuous_hypothesis_completed(&self, _: &Experiment, _: &Journal) -> Result<(), HandlerError> {
        self.fail("continuous_hypothesis_completed")
    }
    fn start_method(&self, _: &Experiment) -> Result<(), HandlerError> {
        self.fail("start_method")
    }
    fn method_completed(&self, _: &Experiment, _: &[Run]) -> Result<(), HandlerError> {
        self.fail("method_completed")
    }
    fn start_rollbacks(&self, _: &Experiment) -> Result<(), HandlerError> {
        self.fail("start_rollbacks")
    }
    fn rollbacks_completed(&self, _: &Experiment, _: &Journal) -> Result<(), HandlerError> {
        self.fail("rollbacks_completed")
    }
    fn start_hypothesis_before(&self, _: &Experiment) -> Result<(), HandlerError> {
        self.fail("start_hypothesis_before")
    }
    fn hypothesis_before_completed(&self, _: &Experiment, _: &HypothesisResult, _: &Journal) -> Result<(), HandlerError> {
        self.fail("hypothesis_before_completed")
    }
    fn start_hypothesis_after(&self, _: &Experiment) -> Result<(), HandlerError> {
        self.fail("start_hypothesis_after")
    }
    fn hypothesis_after_completed(&self, _: &Experiment, _: &HypothesisResult, _: &Journal) -> Result<(), HandlerError> {
        self.fail("hypothesis_after_completed")
    }
    fn start_cooldown(&self, _: f64) -> Result<(), HandlerError> {
        self.fail("start_cooldown")
    }
    fn cooldown_completed(&self) -> Result<(), HandlerError> {
        self.fail("cooldown_completed")
    }
}

// ---------------------------------------------------------------------------
// Controls
// ---------------------------------------------------------------------------

/// Annotates everything it is handed and records which hooks ran
#[derive(Debug, Default)]
pub struct AnnotatingControl {
    hooks: Mutex<Vec<&'static str>>,
    configured_with: Mutex<Option<Configuration>>,
}

impl AnnotatingControl {
    pub const KEY: &'static str = "annotated-by";

    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn hooks(&self) -> Vec<&'static str> {
        self.hooks.lock().clone()
    }

    pub fn configured_with(&self) -> Option<Configuration> {
        self.configured_with.lock().clone()
    }

    fn mark(&self, hook: &'static str) {
        self.hooks.lock().push(hook);
    }
}

#[async_trait]
impl Control for AnnotatingControl {
    fn name(&self) -> &str {
        "annotating"
    }

    async fn configure(
        &self,
        experiment: &mut Experiment,
        configuration: &Configuration,
        _: &Secrets,
        _: &Settings,
    ) -> Result<(), ControlError> {
        self.mark("configure");
        *self.configured_with.lock() = Some(configuration.clone());
        experiment.annotations.insert("configured".into(), Value::Bool(true));
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), ControlError> {
        self.mark("cleanup");
        Ok(())
    }

    async fn before_experiment(&self, experiment: &mut Experiment) -> Result<(), ControlError> {
        self.mark("before_experiment");
        experiment.annotations.insert(Self::KEY.into(), json!("experiment"));
        Ok(())
    }

    async fn after_experiment(&self, _: &Experiment, journal: &mut Journal) -> Result<(), ControlError> {
        self.mark("after_experiment");
        journal.annotations.insert(Self::KEY.into(), json!("journal"));
        Ok(())
    }

    async fn before_hypothesis(&self, _: &mut Hypothesis) -> Result<(), ControlError> {
        self.mark("before_hypothesis");
        Ok(())
    }

    async fn after_hypothesis(&self, _: &mut Hypothesis, state: &mut HypothesisResult) -> Result<(), ControlError> {
        self.mark("after_hypothesis");
        state.annotations.insert(Self::KEY.into(), json!("hypothesis"));
        Ok(())
    }

    async fn before_method(&self, _: &Experiment) -> Result<(), ControlError> {
        self.mark("before_method");
        Ok(())
    }

    async fn after_method(&self, _: &Experiment, _: &mut Vec<Run>) -> Result<(), ControlError> {
        self.mark("after_method");
        Ok(())
    }

    async fn before_rollback(&self, _: &Experiment) -> Result<(), ControlError> {
        self.mark("before_rollback");
        Ok(())
    }

    async fn after_rollback(&self, _: &Experiment, _: &mut Vec<Run>) -> Result<(), ControlError> {
        self.mark("after_rollback");
        Ok(())
    }

    async fn before_activity(&self, activity: &mut Activity) -> Result<(), ControlError> {
        self.mark("before_activity");
        activity.annotations.insert(Self::KEY.into(), json!("activity"));
        Ok(())
    }

    async fn after_activity(&self, _: &mut Activity, run: &mut Run) -> Result<(), ControlError> {
        self.mark("after_activity");
        run.annotations.insert(Self::KEY.into(), json!("run"));
        Ok(())
    }
}

/// Requests a forced exit right before the named activity
#[derive(Debug)]
pub struct ExitOnActivityControl {
    activity: String,
}

impl ExitOnActivityControl {
    pub fn new(activity: &str) -> Arc<Self> {
        Arc::new(Self {
            activity: activity.to_string(),
        })
    }
}

#[async_trait]
impl Control for ExitOnActivityControl {
    fn name(&self) -> &str {
        "exit-on-activity"
    }

    async fn before_activity(&self, activity: &mut Activity) -> Result<(), ControlError> {
        if activity.name == self.activity {
            return Err(ControlError::Exit(format!("leaving before '{}'", activity.name)));
        }
        Ok(())
    }
}

/// Fails in `before_method`
#[derive(Debug, Default)]
pub struct FailingControl;

#[async_trait]
impl Control for FailingControl {
    fn name(&self) -> &str {
        "failing"
    }

    async fn before_method(&self, _: &Experiment) -> Result<(), ControlError> {
        Err(ControlError::failed("failing", "refusing to start the method"))
    }
}
