//! Run records and the journal
//!
//! Passive result structures accumulated during a run and returned to the
//! caller. Field names and nesting are the journal's wire layout.

use crate::types::{Activity, Annotations, Experiment};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Execution status of one activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Provider returned normally
    Succeeded,
    /// Provider raised or timed out
    Failed,
    /// Provider was cut short by a stop signal
    Aborted,
}

/// Record of one executed activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// The activity as executed (including control annotations)
    pub activity: Activity,
    /// Outcome
    pub status: RunStatus,
    /// Provider output on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error chain on failure, innermost last
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<Vec<String>>,
    /// Start time
    pub start: DateTime<Utc>,
    /// End time
    pub end: DateTime<Utc>,
    /// Duration in seconds
    pub duration: f64,
    /// Tolerance verdict for steady-state probes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance_met: Option<bool>,
    /// Annotations added by controls
    #[serde(flatten)]
    pub annotations: Annotations,
}

impl Run {
    /// Create a record spanning `start..now`
    #[must_use]
    pub fn finished(activity: Activity, status: RunStatus, start: DateTime<Utc>) -> Self {
        let end = Utc::now();
        Self {
            activity,
            status,
            output: None,
            exception: None,
            start,
            end,
            duration: seconds_between(start, end),
            tolerance_met: None,
            annotations: Annotations::new(),
        }
    }

    /// With output
    #[inline]
    #[must_use]
    pub fn with_output(mut self, output: Option<Value>) -> Self {
        self.output = output;
        self
    }

    /// With exception chain
    #[inline]
    #[must_use]
    pub fn with_exception(mut self, chain: Vec<String>) -> Self {
        self.exception = Some(chain);
        self
    }

    /// Check if the activity succeeded
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Verdict of one hypothesis evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypothesisOutcome {
    /// Every probe within tolerance
    Satisfied,
    /// A probe was out of tolerance
    Deviated,
    /// A probe raised
    Errored,
}

/// Result of one hypothesis evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisResult {
    /// Verdict
    pub outcome: HypothesisOutcome,
    /// Convenience flag, `true` only when satisfied
    pub steady_state_met: bool,
    /// Probe records, in evaluation order
    pub probes: Vec<Run>,
    /// Annotations added by controls
    #[serde(flatten)]
    pub annotations: Annotations,
}

impl HypothesisResult {
    /// Create result from probe records
    #[must_use]
    pub fn new(outcome: HypothesisOutcome, probes: Vec<Run>) -> Self {
        Self {
            outcome,
            steady_state_met: outcome == HypothesisOutcome::Satisfied,
            probes,
            annotations: Annotations::new(),
        }
    }

    /// Check for a tolerance deviation
    #[inline]
    #[must_use]
    pub fn deviated(&self) -> bool {
        self.outcome == HypothesisOutcome::Deviated
    }

    /// Check for a probe error
    #[inline]
    #[must_use]
    pub fn errored(&self) -> bool {
        self.outcome == HypothesisOutcome::Errored
    }
}

/// Hypothesis results per phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SteadyStates {
    /// Before-method check
    pub before: Option<HypothesisResult>,
    /// After-method check
    pub after: Option<HypothesisResult>,
    /// During-method checks; `None` when the strategy has no during phase
    pub during: Option<Vec<HypothesisResult>>,
}

/// Overall status of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalStatus {
    /// Ran to the end without failing checks
    #[default]
    Completed,
    /// A steady-state check failed, errored or deviated
    Failed,
    /// Stopped by an interrupt or exit request
    Interrupted,
    /// Stopped by a failing control
    Aborted,
}

impl std::fmt::Display for JournalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
            Self::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

/// Result of one experiment run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journal {
    /// Engine version that produced the journal
    pub engine_version: String,
    /// Echo of the experiment (including control annotations)
    pub experiment: Experiment,
    /// Overall status
    pub status: JournalStatus,
    /// A during/continuous check reported a deviation
    pub deviated: bool,
    /// Hypothesis results
    pub steady_states: SteadyStates,
    /// Method records, in method order
    pub run: Vec<Run>,
    /// Rollback records, in rollback order
    pub rollbacks: Vec<Run>,
    /// Start time
    pub start: DateTime<Utc>,
    /// End time, set when the run is finalized
    pub end: Option<DateTime<Utc>>,
    /// Duration in seconds
    pub duration: f64,
    /// Annotations added by controls
    #[serde(flatten)]
    pub annotations: Annotations,
}

impl Journal {
    /// Open a journal for a starting run
    #[must_use]
    pub fn start(experiment: Experiment) -> Self {
        Self {
            engine_version: crate::VERSION.to_string(),
            experiment,
            status: JournalStatus::Completed,
            deviated: false,
            steady_states: SteadyStates::default(),
            run: Vec::new(),
            rollbacks: Vec::new(),
            start: Utc::now(),
            end: None,
            duration: 0.0,
            annotations: Annotations::new(),
        }
    }

    /// Stamp end time and duration
    pub fn close(&mut self) {
        let end = Utc::now();
        self.duration = seconds_between(self.start, end);
        self.end = Some(end);
    }

    /// Check if any method activity failed
    #[must_use]
    pub fn method_failed(&self) -> bool {
        self.run.iter().any(|r| r.status == RunStatus::Failed)
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let micros = (end - start).num_microseconds().unwrap_or(0) as f64;
    micros / 1_000_000.0
}
