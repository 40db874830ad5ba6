//! Run configuration
//!
//! - [`Strategy`]: which hypothesis phases execute
//! - [`Schedule`]: continuous check cadence, fail-fast, cooldown
//! - [`Settings`]: runtime settings document (rollback strategy, dry runs)

use crate::error::ConfigError;
use crate::types::ActivityKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default seconds between continuous hypothesis checks
pub const DEFAULT_CONTINUOUS_FREQUENCY: f64 = 1.0;

/// Default bound on waiting for the continuous scheduler to stop
pub const DEFAULT_CONTINUOUS_STOP_TIMEOUT: f64 = 30.0;

/// Hypothesis strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Check before and after the method
    #[default]
    Default,
    /// Check before the method only
    BeforeMethod,
    /// Check after the method only
    AfterMethod,
    /// Check after each method activity, synchronously
    DuringMethod,
    /// Check on a timer while the method runs
    Continuous,
}

impl Strategy {
    /// All strategies
    pub const ALL: [Strategy; 5] = [
        Strategy::Default,
        Strategy::BeforeMethod,
        Strategy::AfterMethod,
        Strategy::DuringMethod,
        Strategy::Continuous,
    ];

    /// Whether the before-method check runs
    #[inline]
    #[must_use]
    pub fn runs_before(self) -> bool {
        matches!(self, Self::Default | Self::BeforeMethod)
    }

    /// Whether the after-method check runs
    #[inline]
    #[must_use]
    pub fn runs_after(self) -> bool {
        matches!(self, Self::Default | Self::AfterMethod)
    }

    /// Whether checks run during the method
    #[inline]
    #[must_use]
    pub fn runs_during(self) -> bool {
        matches!(self, Self::DuringMethod | Self::Continuous)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Default => "default",
            Self::BeforeMethod => "before-method-only",
            Self::AfterMethod => "after-method-only",
            Self::DuringMethod => "during-method-only",
            Self::Continuous => "continuously",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "default" => Ok(Self::Default),
            "before-method" | "before-method-only" => Ok(Self::BeforeMethod),
            "after-method" | "after-method-only" => Ok(Self::AfterMethod),
            "during-method" | "during-method-only" => Ok(Self::DuringMethod),
            "continuous" | "continuously" => Ok(Self::Continuous),
            _ => Err(ConfigError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Continuous check cadence and deviation policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Seconds between continuous checks
    #[serde(default = "default_frequency")]
    pub continuous_hypothesis_frequency: f64,
    /// Cancel remaining method activities on deviation
    #[serde(default)]
    pub fail_fast: bool,
    /// Seconds to wait between the method and the after-check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<f64>,
}

fn default_frequency() -> f64 {
    DEFAULT_CONTINUOUS_FREQUENCY
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            continuous_hypothesis_frequency: DEFAULT_CONTINUOUS_FREQUENCY,
            fail_fast: false,
            cooldown: None,
        }
    }
}

impl Schedule {
    /// Create default schedule
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With continuous check frequency (seconds)
    #[inline]
    #[must_use]
    pub fn with_frequency(mut self, secs: f64) -> Self {
        self.continuous_hypothesis_frequency = secs;
        self
    }

    /// With fail-fast policy
    #[inline]
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// With cooldown (seconds)
    #[inline]
    #[must_use]
    pub fn with_cooldown(mut self, secs: f64) -> Self {
        self.cooldown = Some(secs);
        self
    }

    /// Reject durations that are non-positive, non-finite or too large to
    /// represent
    ///
    /// # Errors
    /// `ConfigError::InvalidSchedule` naming the offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        let freq = self.continuous_hypothesis_frequency;
        if !seconds(freq).is_some_and(|d| !d.is_zero()) {
            return Err(ConfigError::InvalidSchedule(format!(
                "continuous_hypothesis_frequency must be a positive number of seconds, got {freq}"
            )));
        }
        if let Some(cooldown) = self.cooldown {
            if seconds(cooldown).is_none() {
                return Err(ConfigError::InvalidSchedule(format!(
                    "cooldown must be a non-negative number of seconds, got {cooldown}"
                )));
            }
        }
        Ok(())
    }

    /// Frequency as a duration; out-of-range values saturate
    #[inline]
    #[must_use]
    pub fn frequency(&self) -> Duration {
        seconds(self.continuous_hypothesis_frequency).unwrap_or(Duration::MAX)
    }

    /// Cooldown as a duration, if any
    #[inline]
    #[must_use]
    pub fn cooldown(&self) -> Option<Duration> {
        self.cooldown
            .and_then(seconds)
            .filter(|d| !d.is_zero())
    }
}

/// Seconds as a [`Duration`]; `None` when negative, not finite or too large
#[inline]
#[must_use]
pub fn seconds(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

/// When rollbacks run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackStrategy {
    /// Regardless of outcome
    Always,
    /// Never
    Never,
    /// Only when the run failed or deviated
    #[default]
    Default,
    /// Only when a deviation was detected
    Deviated,
}

impl RollbackStrategy {
    /// Resolve against the run outcome
    #[inline]
    #[must_use]
    pub fn should_run(self, deviated: bool, failed: bool) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Default => deviated || failed,
            Self::Deviated => deviated,
        }
    }
}

impl std::fmt::Display for RollbackStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Always => "always",
            Self::Never => "never",
            Self::Default => "default",
            Self::Deviated => "deviated",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RollbackStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            "default" => Ok(Self::Default),
            "deviated" => Ok(Self::Deviated),
            _ => Err(ConfigError::UnknownRollbackStrategy(s.to_string())),
        }
    }
}

/// Dry-run mode: skip provider calls or pauses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DryRun {
    /// Skip probe calls
    Probes,
    /// Skip action calls
    Actions,
    /// Skip every provider call
    Activities,
    /// Skip pauses
    Pause,
}

impl DryRun {
    /// Whether a provider call of this kind is skipped
    #[inline]
    #[must_use]
    pub fn skips(self, kind: ActivityKind) -> bool {
        matches!(
            (self, kind),
            (Self::Activities, _)
                | (Self::Probes, ActivityKind::Probe)
                | (Self::Actions, ActivityKind::Action)
        )
    }

    /// Whether pauses are skipped
    #[inline]
    #[must_use]
    pub fn skips_pauses(self) -> bool {
        self == Self::Pause
    }
}

/// `runtime.rollbacks`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackSettings {
    /// Rollback strategy
    #[serde(default)]
    pub strategy: RollbackStrategy,
}

/// `runtime.hypothesis`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HypothesisSettings {
    /// Seconds to wait for the continuous scheduler to stop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuous_stop_timeout: Option<f64>,
}

/// `runtime`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Rollback settings
    #[serde(default)]
    pub rollbacks: RollbackSettings,
    /// Hypothesis settings
    #[serde(default)]
    pub hypothesis: HypothesisSettings,
    /// Dry-run mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry: Option<DryRun>,
}

/// Settings document
///
/// Unknown top-level sections are kept in `extra` and handed to controls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Runtime section
    #[serde(default)]
    pub runtime: RuntimeSettings,
    /// Other sections
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Settings {
    /// Create default settings
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With rollback strategy
    #[inline]
    #[must_use]
    pub fn with_rollback_strategy(mut self, strategy: RollbackStrategy) -> Self {
        self.runtime.rollbacks.strategy = strategy;
        self
    }

    /// With dry-run mode
    #[inline]
    #[must_use]
    pub fn with_dry_run(mut self, dry: DryRun) -> Self {
        self.runtime.dry = Some(dry);
        self
    }

    /// Effective rollback strategy
    #[inline]
    #[must_use]
    pub fn rollback_strategy(&self) -> RollbackStrategy {
        self.runtime.rollbacks.strategy
    }

    /// Bound on waiting for the continuous scheduler to stop
    #[must_use]
    pub fn continuous_stop_timeout(&self) -> Duration {
        self.runtime
            .hypothesis
            .continuous_stop_timeout
            .and_then(seconds)
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_secs_f64(DEFAULT_CONTINUOUS_STOP_TIMEOUT))
    }

    /// Parse a YAML settings document
    ///
    /// # Errors
    /// `ConfigError::InvalidSettings` on malformed input
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| ConfigError::InvalidSettings(e.to_string()))
    }

    /// Parse a JSON settings document
    ///
    /// # Errors
    /// `ConfigError::InvalidSettings` on malformed input
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::InvalidSettings(e.to_string()))
    }

    /// Load settings from a `.json`, `.yaml` or `.yml` file
    ///
    /// # Errors
    /// `ConfigError::InvalidSettings` if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::InvalidSettings(format!("{}: {e}", path.display())))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&text)
        } else {
            Self::from_yaml_str(&text)
        }
    }
}
