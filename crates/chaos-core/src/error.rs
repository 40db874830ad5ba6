//! Error types for the chaos engine
//!
//! Provides the error taxonomy for:
//! - Configuration problems detected before anything runs
//! - Activity provider outcomes (failure, timeout, stop signals)
//! - Control hook failures
//! - Event handler faults (always isolated)

use crate::interruption::InterruptionState;
use crate::journal::Journal;

/// Top-level error returned from an experiment run
///
/// Ordinary experiment failures never surface here; they are recorded in the
/// [`Journal`]. Only configuration-level errors and control failures do.
#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    /// Configuration rejected before execution started
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A control hook failed; the partial journal is attached
    #[error("run aborted by control: {source}")]
    Aborted {
        /// The hook failure
        source: ControlError,
        /// Journal as it stood when the run was aborted
        journal: Box<Journal>,
    },
}

impl ExperimentError {
    /// Check if this is a configuration error
    #[inline]
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Partial journal of an aborted run, if any
    #[must_use]
    pub fn journal(&self) -> Option<&Journal> {
        match self {
            Self::Aborted { journal, .. } => Some(journal),
            Self::Config(_) => None,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Schedule values out of range
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Unknown strategy name
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    /// Unknown rollback strategy name
    #[error("unknown rollback strategy: {0}")]
    UnknownRollbackStrategy(String),

    /// No provider registered for an activity's provider type
    #[error("no provider registered for type '{provider_type}' (activity '{activity}')")]
    UnknownProvider {
        /// Activity name
        activity: String,
        /// Provider type requested
        provider_type: String,
    },

    /// Experiment declares a control nobody registered
    #[error("unknown control: {0}")]
    UnknownControl(String),

    /// Steady-state probe without a tolerance
    #[error("hypothesis probe '{0}' has no tolerance")]
    MissingTolerance(String),

    /// Invalid tolerance definition
    #[error("invalid tolerance on '{probe}': {reason}")]
    InvalidTolerance {
        /// Probe name
        probe: String,
        /// What is wrong with it
        reason: String,
    },

    /// Activity pause or timeout out of range
    #[error("invalid activity '{activity}': {reason}")]
    InvalidActivity {
        /// Activity name
        activity: String,
        /// What is wrong with it
        reason: String,
    },

    /// Settings document could not be parsed
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

/// Outcome of a failed provider call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActivityFailure {
    /// Provider raised
    #[error("activity failed: {0}")]
    Failed(String),

    /// Provider exceeded the activity timeout
    #[error("activity timed out after {secs}s")]
    Timeout {
        /// Configured timeout in seconds
        secs: f64,
    },

    /// Provider asked for the run to be interrupted
    #[error("execution interrupted: {0}")]
    Interrupted(String),

    /// Provider asked for a forced exit
    #[error("exit requested: {0}")]
    Exit(String),
}

impl ActivityFailure {
    /// Create a plain failure
    #[inline]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Check if this failure is a stop-the-world signal
    #[inline]
    #[must_use]
    pub fn is_stop_signal(&self) -> bool {
        matches!(self, Self::Interrupted(_) | Self::Exit(_))
    }
}

/// Control hook errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    /// Hook failed
    #[error("control '{control}' failed: {message}")]
    Failed {
        /// Control name
        control: String,
        /// Failure description
        message: String,
    },

    /// Hook asked for the run to be interrupted
    #[error("execution interrupted by control: {0}")]
    Interrupted(String),

    /// Hook asked for a forced exit
    #[error("exit requested by control: {0}")]
    Exit(String),
}

impl ControlError {
    /// Create a hook failure
    #[inline]
    pub fn failed(control: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            control: control.into(),
            message: message.into(),
        }
    }

    /// Check if this error is a stop-the-world signal
    #[inline]
    #[must_use]
    pub fn is_stop_signal(&self) -> bool {
        matches!(self, Self::Interrupted(_) | Self::Exit(_))
    }
}

/// Interruption coordinator refused a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal interruption transition: {from:?} -> {to:?}")]
pub struct IllegalTransition {
    /// Current state
    pub from: InterruptionState,
    /// Requested state
    pub to: InterruptionState,
}

/// Error an event handler may return; swallowed by the registry
pub type HandlerError = anyhow::Error;

/// Flatten an error and its sources into a list of messages, innermost last
#[must_use]
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut chain = vec![error.to_string()];
    let mut source = error.source();
    while let Some(inner) = source {
        chain.push(inner.to_string());
        source = inner.source();
    }
    chain
}
