//! Activity execution
//!
//! [`ActivityProvider`] is the external capability that performs a probe or
//! action. [`ActivityRunner`] wraps a provider call with the activity's
//! control hooks, pauses, timeout and dry-run policy and turns the outcome
//! into a [`Run`] record. Provider failures never escape as errors.

use crate::config::{seconds, DryRun};
use crate::controls::HookInvoker;
use crate::error::{error_chain, ActivityFailure, ConfigError, ControlError};
use crate::interruption::{Halt, InterruptionCoordinator};
use crate::journal::{Run, RunStatus};
use crate::types::{Activity, Configuration, Experiment, Secrets};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Values a provider may read while executing
#[derive(Debug, Clone, Default)]
pub struct ActivityContext {
    /// Experiment configuration
    pub configuration: Configuration,
    /// Experiment secrets
    pub secrets: Secrets,
}

impl ActivityContext {
    /// Context for an experiment
    #[must_use]
    pub fn for_experiment(experiment: &Experiment) -> Self {
        Self {
            configuration: experiment.configuration.clone(),
            secrets: experiment.secrets.clone(),
        }
    }
}

/// Executes activities of one provider type
///
/// Any `Ok` is a success whatever the payload; any `Err` is a failure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivityProvider: Send + Sync {
    /// Execute one activity
    async fn execute(&self, activity: &Activity, context: &ActivityContext) -> Result<Value, ActivityFailure>;
}

/// Providers keyed by provider type
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ActivityProvider>>,
}

impl ProviderRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for `provider_type`, replacing any previous one
    pub fn register(&mut self, provider_type: impl Into<String>, provider: Arc<dyn ActivityProvider>) {
        self.providers.insert(provider_type.into(), provider);
    }

    /// Check if `provider_type` is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, provider_type: &str) -> bool {
        self.providers.contains_key(provider_type)
    }

    /// Look up a provider
    #[must_use]
    pub fn get(&self, provider_type: &str) -> Option<Arc<dyn ActivityProvider>> {
        self.providers.get(provider_type).cloned()
    }

    /// Registered provider types
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Check every activity of the experiment resolves to a provider and
    /// carries usable pauses and timeout
    ///
    /// # Errors
    /// `ConfigError::UnknownProvider` or `ConfigError::InvalidActivity` for
    /// the first bad activity
    pub fn validate(&self, experiment: &Experiment) -> Result<(), ConfigError> {
        for activity in experiment.activities() {
            if !self.contains(&activity.provider.provider_type) {
                return Err(ConfigError::UnknownProvider {
                    activity: activity.name.clone(),
                    provider_type: activity.provider.provider_type.clone(),
                });
            }
            validate_timing(activity)?;
        }
        Ok(())
    }
}

fn validate_timing(activity: &Activity) -> Result<(), ConfigError> {
    let pauses = activity.pauses.unwrap_or_default();
    let fields = [
        ("pauses.before", pauses.before),
        ("pauses.after", pauses.after),
        ("timeout", activity.timeout),
    ];
    for (field, value) in fields {
        if let Some(secs) = value {
            if seconds(secs).is_none() {
                return Err(ConfigError::InvalidActivity {
                    activity: activity.name.clone(),
                    reason: format!("{field} must be a non-negative number of seconds, got {secs}"),
                });
            }
        }
    }
    Ok(())
}

/// Positive durations only; values too large to represent saturate
fn positive(secs: Option<f64>) -> Option<Duration> {
    secs.filter(|s| s.is_finite() && *s > 0.0)
        .map(|s| seconds(s).unwrap_or(Duration::MAX))
}

/// Runs single activities for one experiment run
#[derive(Clone)]
pub struct ActivityRunner {
    providers: Arc<ProviderRegistry>,
    context: Arc<ActivityContext>,
    hooks: Arc<HookInvoker>,
    coordinator: InterruptionCoordinator,
    dry: Option<DryRun>,
}

impl ActivityRunner {
    /// Create runner
    #[must_use]
    pub fn new(
        providers: Arc<ProviderRegistry>,
        context: ActivityContext,
        hooks: Arc<HookInvoker>,
        coordinator: InterruptionCoordinator,
    ) -> Self {
        Self {
            providers,
            context: Arc::new(context),
            hooks,
            coordinator,
            dry: None,
        }
    }

    /// With dry-run mode
    #[inline]
    #[must_use]
    pub fn with_dry_run(mut self, dry: Option<DryRun>) -> Self {
        self.dry = dry;
        self
    }

    /// Control hooks shared by this runner
    #[must_use]
    pub fn hooks(&self) -> &Arc<HookInvoker> {
        &self.hooks
    }

    /// Run an activity bracketed by its control hooks
    ///
    /// Returns `Ok(None)` when a `before_activity` hook requested a stop; the
    /// activity is then not executed and leaves no record.
    ///
    /// # Errors
    /// A failing control hook
    pub async fn run(&self, activity: &Activity, halt: Option<&Halt>) -> Result<Option<Run>, ControlError> {
        let mut activity = activity.clone();
        if !self.hooks.before_activity(&mut activity).await? {
            debug!("Skipping activity '{}': stop requested by control", activity.name);
            return Ok(None);
        }
        let mut run = self.execute(&activity, halt).await;
        self.hooks.after_activity(&mut activity, &mut run).await?;
        run.activity = activity;
        Ok(Some(run))
    }

    /// Run an activity without control hooks
    ///
    /// Pauses are cut short when `halt` fires.
    pub async fn execute(&self, activity: &Activity, halt: Option<&Halt>) -> Run {
        let start = Utc::now();
        let pauses = activity.pauses.unwrap_or_default();

        self.pause(pauses.before, halt).await;

        if self.dry.is_some_and(|dry| dry.skips(activity.kind)) {
            debug!("Dry run: not calling provider for {} '{}'", activity.kind, activity.name);
            self.pause(pauses.after, halt).await;
            return Run::finished(activity.clone(), RunStatus::Succeeded, start);
        }

        debug!("Running {} '{}'", activity.kind, activity.name);
        let outcome = self.call_provider(activity).await;
        self.pause(pauses.after, halt).await;

        match outcome {
            Ok(output) => Run::finished(activity.clone(), RunStatus::Succeeded, start).with_output(Some(output)),
            Err(failure) => {
                let status = if failure.is_stop_signal() {
                    RunStatus::Aborted
                } else {
                    RunStatus::Failed
                };
                match &failure {
                    ActivityFailure::Interrupted(reason) => {
                        self.coordinator.request_interrupt(reason.clone());
                    }
                    ActivityFailure::Exit(reason) => {
                        self.coordinator.request_exit(reason.clone());
                    }
                    ActivityFailure::Failed(_) | ActivityFailure::Timeout { .. } => {
                        warn!("{} '{}' failed: {}", activity.kind, activity.name, failure);
                    }
                }
                Run::finished(activity.clone(), status, start).with_exception(error_chain(&failure))
            }
        }
    }

    async fn call_provider(&self, activity: &Activity) -> Result<Value, ActivityFailure> {
        let provider = self.providers.get(&activity.provider.provider_type).ok_or_else(|| {
            ActivityFailure::failed(format!(
                "no provider registered for type '{}'",
                activity.provider.provider_type
            ))
        })?;
        let call = provider.execute(activity, &self.context);
        match positive(activity.timeout) {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| ActivityFailure::Timeout {
                secs: limit.as_secs_f64(),
            })?,
            None => call.await,
        }
    }

    async fn pause(&self, secs: Option<f64>, halt: Option<&Halt>) {
        let Some(duration) = positive(secs) else {
            return;
        };
        if self.dry.is_some_and(DryRun::skips_pauses) {
            return;
        }
        match halt {
            Some(halt) => {
                if !halt.sleep(duration).await {
                    debug!("Pause of {:?} cut short", duration);
                }
            }
            None => tokio::time::sleep(duration).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interruption::StopKind;
    use serde_json::json;

    fn runner_with(provider: MockActivityProvider, coordinator: &InterruptionCoordinator) -> ActivityRunner {
        let mut providers = ProviderRegistry::new();
        providers.register("mock", Arc::new(provider));
        ActivityRunner::new(
            Arc::new(providers),
            ActivityContext::default(),
            Arc::new(HookInvoker::empty(coordinator.clone())),
            coordinator.clone(),
        )
    }

    #[tokio::test]
    async fn success_records_output() {
        let mut provider = MockActivityProvider::new();
        provider.expect_execute().times(1).returning(|_, _| Ok(json!({"status": 200})));
        let coordinator = InterruptionCoordinator::new();
        let runner = runner_with(provider, &coordinator);

        let run = runner.execute(&Activity::probe("ping", "mock"), None).await;
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.output, Some(json!({"status": 200})));
        assert!(run.exception.is_none());
    }

    #[tokio::test]
    async fn failure_records_exception() {
        let mut provider = MockActivityProvider::new();
        provider
            .expect_execute()
            .returning(|_, _| Err(ActivityFailure::failed("oops")));
        let coordinator = InterruptionCoordinator::new();
        let runner = runner_with(provider, &coordinator);

        let run = runner.execute(&Activity::action("explode", "mock"), None).await;
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.exception.unwrap().last().unwrap().contains("oops"));
        assert!(!coordinator.stop_requested());
    }

    #[tokio::test]
    async fn exit_from_provider_is_routed() {
        let mut provider = MockActivityProvider::new();
        provider
            .expect_execute()
            .returning(|_, _| Err(ActivityFailure::Exit("provider gave up".into())));
        let coordinator = InterruptionCoordinator::new();
        let runner = runner_with(provider, &coordinator);

        let run = runner.execute(&Activity::action("leave", "mock"), None).await;
        assert_eq!(run.status, RunStatus::Aborted);
        assert_eq!(coordinator.stop_request().unwrap().kind, StopKind::Exit);
    }

    #[tokio::test]
    async fn dry_run_skips_provider() {
        let mut provider = MockActivityProvider::new();
        provider.expect_execute().never();
        let coordinator = InterruptionCoordinator::new();
        let runner = runner_with(provider, &coordinator).with_dry_run(Some(DryRun::Actions));

        let run = runner.execute(&Activity::action("kill", "mock"), None).await;
        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(run.output.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_timeout_saturates() {
        let mut provider = MockActivityProvider::new();
        provider.expect_execute().returning(|_, _| Ok(json!(true)));
        let coordinator = InterruptionCoordinator::new();
        let runner = runner_with(provider, &coordinator);

        let run = runner.execute(&Activity::probe("ping", "mock").with_timeout(1e20), None).await;
        assert_eq!(run.status, RunStatus::Succeeded);
    }

    #[test]
    fn unrepresentable_pauses_are_config_errors() {
        let mut providers = ProviderRegistry::new();
        providers.register("mock", Arc::new(MockActivityProvider::new()));

        let paused = Experiment::new("x").with_activity(Activity::action("kill", "mock").with_pauses(Some(1e20), None));
        assert!(matches!(
            providers.validate(&paused),
            Err(ConfigError::InvalidActivity { activity, .. }) if activity == "kill"
        ));

        let timed = Experiment::new("x").with_activity(Activity::action("kill", "mock").with_timeout(-1.0));
        assert!(matches!(providers.validate(&timed), Err(ConfigError::InvalidActivity { .. })));

        let fine = Experiment::new("x").with_activity(Activity::action("kill", "mock").with_pauses(None, Some(2.0)));
        assert!(providers.validate(&fine).is_ok());
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let providers = ProviderRegistry::new();
        let experiment = Experiment::new("x").with_activity(Activity::action("kill", "ssh"));
        assert!(matches!(
            providers.validate(&experiment),
            Err(ConfigError::UnknownProvider { provider_type, .. }) if provider_type == "ssh"
        ));
    }
}
