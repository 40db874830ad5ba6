//! Chaos Core - experiment execution engine
//!
//! Runs a declarative chaos experiment:
//! - Verifies a steady-state hypothesis before, during or after the method
//! - Executes the method's fault-injection and observation activities
//! - Runs rollbacks according to the rollback strategy
//! - Notifies registered observers of every lifecycle event
//! - Honours operator interrupts and forced exits
//!
//! and returns a [`Journal`] describing what happened.
//!
//! # Example
//!
//! ```rust,ignore
//! use chaos_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(http: Arc<dyn ActivityProvider>) -> Result<(), ExperimentError> {
//! let experiment = Experiment::new("service survives a pod kill")
//!     .with_hypothesis(
//!         Hypothesis::new("service answers")
//!             .with_probe(Activity::probe("health", "http").with_tolerance(Tolerance::exact(200.into()))),
//!     )
//!     .with_activity(Activity::action("kill-pod", "http"));
//!
//! let executor = Executor::builder().provider("http", http).build();
//! let journal = executor
//!     .run(
//!         experiment,
//!         Strategy::Continuous,
//!         &Schedule::new().with_frequency(0.5).with_fail_fast(true),
//!         &Settings::default(),
//!         &EventHandlerRegistry::new(),
//!     )
//!     .await?;
//!
//! println!("{} (deviated: {})", journal.status, journal.deviated);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod activity;
pub mod config;
pub mod controls;
pub mod error;
pub mod events;
pub mod executor;
pub mod hypothesis;
pub mod interruption;
pub mod journal;
pub mod method;
pub mod rollback;
pub mod scheduler;
pub mod types;

// Re-exports for convenience
pub use activity::{ActivityContext, ActivityProvider, ActivityRunner, ProviderRegistry};
pub use config::{
    DryRun, HypothesisSettings, RollbackSettings, RollbackStrategy, RuntimeSettings, Schedule,
    Settings, Strategy,
};
pub use controls::{Control, ControlCatalogue, HookInvoker};
pub use error::{
    error_chain, ActivityFailure, ConfigError, ControlError, ExperimentError, HandlerError,
    IllegalTransition,
};
pub use events::{EventHandlerRegistry, RunEventHandler};
pub use executor::{run_experiment, Executor, ExecutorBuilder};
pub use hypothesis::{within_tolerance, HypothesisEvaluator};
pub use interruption::{
    CancelSignal, Halt, InterruptHandle, InterruptionCoordinator, InterruptionState, StopKind,
};
pub use journal::{
    HypothesisOutcome, HypothesisResult, Journal, JournalStatus, Run, RunStatus, SteadyStates,
};
pub use types::{
    Activity, ActivityKind, Annotations, Configuration, ControlSpec, Experiment, Hypothesis,
    Pauses, ProviderSpec, Secrets, Tolerance, TypedTolerance,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running experiments
    pub use crate::{
        Activity, ActivityContext, ActivityFailure, ActivityProvider, Control, ControlError,
        EventHandlerRegistry, Executor, Experiment, ExperimentError, Hypothesis, Journal,
        JournalStatus, RollbackStrategy, RunEventHandler, Schedule, Settings, Strategy, Tolerance,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
