//! Rollback execution
//!
//! Once selected by the rollback strategy, every rollback activity runs in
//! order. Failures are recorded and never stop the remaining rollbacks, and
//! stop requests are not checked.

use crate::activity::ActivityRunner;
use crate::config::RollbackStrategy;
use crate::error::ControlError;
use crate::journal::Run;
use crate::types::Experiment;
use tracing::{info, warn};

/// Runs the rollbacks of one experiment
pub struct RollbackRunner {
    runner: ActivityRunner,
    strategy: RollbackStrategy,
}

impl RollbackRunner {
    /// Create runner
    #[must_use]
    pub fn new(runner: ActivityRunner, strategy: RollbackStrategy) -> Self {
        Self { runner, strategy }
    }

    /// Resolve the strategy against the run outcome
    #[must_use]
    pub fn should_run(&self, deviated: bool, failed: bool) -> bool {
        let selected = self.strategy.should_run(deviated, failed);
        if !selected {
            info!(
                "Rollbacks skipped (strategy '{}', deviated={}, failed={})",
                self.strategy, deviated, failed
            );
        }
        selected
    }

    /// Execute every rollback activity in order
    ///
    /// # Errors
    /// A failing control hook
    pub async fn run(&self, experiment: &Experiment) -> Result<Vec<Run>, ControlError> {
        let hooks = self.runner.hooks();
        hooks.before_rollback(experiment).await?;

        let mut runs = Vec::with_capacity(experiment.rollbacks.len());
        for activity in &experiment.rollbacks {
            if let Some(run) = self.runner.run(activity, None).await? {
                if !run.succeeded() {
                    warn!("Rollback '{}' did not succeed, continuing", activity.name);
                }
                runs.push(run);
            }
        }

        hooks.after_rollback(experiment, &mut runs).await?;
        info!("Rollbacks done ({} of {})", runs.len(), experiment.rollbacks.len());
        Ok(runs)
    }
}
