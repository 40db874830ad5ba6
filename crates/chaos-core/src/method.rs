//! Method execution
//!
//! Activities run strictly in order. The halt condition is checked before
//! each one; an activity that already started always completes. Background
//! activities are spawned and joined before the runner returns, also when a
//! control hook fails.

use crate::activity::ActivityRunner;
use crate::error::ControlError;
use crate::interruption::Halt;
use crate::journal::Run;
use crate::scheduler::DuringCheck;
use crate::types::Experiment;
use futures::future::join_all;
use tracing::{debug, info, warn};

/// Runs the method of one experiment
pub struct MethodRunner {
    runner: ActivityRunner,
    halt: Halt,
    during: Option<DuringCheck>,
}

impl MethodRunner {
    /// Create runner stopping on `halt`
    #[must_use]
    pub fn new(runner: ActivityRunner, halt: Halt) -> Self {
        Self {
            runner,
            halt,
            during: None,
        }
    }

    /// Check the hypothesis after each foreground activity
    #[must_use]
    pub fn with_during_check(mut self, check: Option<DuringCheck>) -> Self {
        self.during = check;
        self
    }

    /// Execute the method; records come back in method order
    ///
    /// # Errors
    /// A failing control hook
    pub async fn run(&self, experiment: &Experiment) -> Result<Vec<Run>, ControlError> {
        let hooks = self.runner.hooks();
        hooks.before_method(experiment).await?;

        let mut records: Vec<(usize, Run)> = Vec::with_capacity(experiment.method.len());
        let mut background = Vec::new();
        let mut failure = None;

        for (position, activity) in experiment.method.iter().enumerate() {
            if self.halt.is_set() {
                info!(
                    "Method stopped before '{}' ({} of {} activities not run)",
                    activity.name,
                    experiment.method.len() - position,
                    experiment.method.len()
                );
                break;
            }

            if activity.background {
                debug!("Dispatching '{}' in the background", activity.name);
                let runner = self.runner.clone();
                let halt = self.halt.clone();
                let activity = activity.clone();
                background.push(tokio::spawn(async move {
                    (position, runner.run(&activity, Some(&halt)).await)
                }));
                continue;
            }

            match self.runner.run(activity, Some(&self.halt)).await {
                Ok(Some(run)) => records.push((position, run)),
                Ok(None) => {}
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }

            if let Some(check) = &self.during {
                if !self.halt.is_set() {
                    if let Err(e) = check.check(Some(&self.halt)).await {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }

        if !background.is_empty() {
            debug!("Joining {} background activities", background.len());
        }
        for joined in join_all(background).await {
            match joined {
                Ok((position, Ok(Some(run)))) => records.push((position, run)),
                Ok((_, Ok(None))) => {}
                Ok((_, Err(e))) => {
                    failure.get_or_insert(e);
                }
                Err(e) => warn!("Background activity task failed: {}", e),
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        records.sort_by_key(|(position, _)| *position);
        let mut runs: Vec<Run> = records.into_iter().map(|(_, run)| run).collect();
        hooks.after_method(experiment, &mut runs).await?;
        Ok(runs)
    }
}
