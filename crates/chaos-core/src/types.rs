//! Core experiment types
//!
//! Defines the declarative input of a run:
//! - The experiment and its steady-state hypothesis
//! - Activities (probes and actions) and their provider references
//! - Tolerances checked against probe outputs
//! - Control declarations

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Provider-visible configuration values
pub type Configuration = serde_json::Map<String, Value>;

/// Resolved secrets handed to providers (never serialized back out)
pub type Secrets = serde_json::Map<String, Value>;

/// Free-form annotations attached by controls during a run
pub type Annotations = BTreeMap<String, Value>;

/// Activity discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    /// Observes the system, never changes it
    Probe,
    /// Changes the system (fault injection, remediation)
    Action,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Probe => write!(f, "probe"),
            Self::Action => write!(f, "action"),
        }
    }
}

/// Reference to the provider executing an activity
///
/// `type` selects the registered provider; the remaining keys are passed
/// through to it untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Registered provider type
    #[serde(rename = "type")]
    pub provider_type: String,
    /// Provider-specific arguments
    #[serde(flatten)]
    pub arguments: serde_json::Map<String, Value>,
}

impl ProviderSpec {
    /// Create provider reference without arguments
    #[inline]
    #[must_use]
    pub fn new(provider_type: impl Into<String>) -> Self {
        Self {
            provider_type: provider_type.into(),
            arguments: serde_json::Map::new(),
        }
    }
}

/// Pauses around an activity, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pauses {
    /// Wait before the provider is called
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<f64>,
    /// Wait after the provider returned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<f64>,
}

/// One step of a hypothesis, method or rollback list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Probe or action
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    /// Name, unique within its list
    pub name: String,
    /// Provider reference
    pub provider: ProviderSpec,
    /// Tolerance, required for steady-state probes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<Tolerance>,
    /// Pauses around the call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pauses: Option<Pauses>,
    /// Dispatch without blocking the method sequence
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub background: bool,
    /// Provider call timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    /// Annotations added by controls
    #[serde(flatten)]
    pub annotations: Annotations,
}

impl Activity {
    fn new(kind: ActivityKind, name: impl Into<String>, provider_type: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            provider: ProviderSpec::new(provider_type),
            tolerance: None,
            pauses: None,
            background: false,
            timeout: None,
            annotations: Annotations::new(),
        }
    }

    /// Create a probe
    #[inline]
    #[must_use]
    pub fn probe(name: impl Into<String>, provider_type: impl Into<String>) -> Self {
        Self::new(ActivityKind::Probe, name, provider_type)
    }

    /// Create an action
    #[inline]
    #[must_use]
    pub fn action(name: impl Into<String>, provider_type: impl Into<String>) -> Self {
        Self::new(ActivityKind::Action, name, provider_type)
    }

    /// Add a provider argument
    #[inline]
    #[must_use]
    pub fn with_argument(mut self, key: impl Into<String>, value: Value) -> Self {
        self.provider.arguments.insert(key.into(), value);
        self
    }

    /// With tolerance
    #[inline]
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    /// With pauses (seconds)
    #[inline]
    #[must_use]
    pub fn with_pauses(mut self, before: Option<f64>, after: Option<f64>) -> Self {
        self.pauses = Some(Pauses { before, after });
        self
    }

    /// Run in background
    #[inline]
    #[must_use]
    pub fn in_background(mut self) -> Self {
        self.background = true;
        self
    }

    /// With provider timeout (seconds)
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, secs: f64) -> Self {
        self.timeout = Some(secs);
        self
    }

    /// Check if this is a probe
    #[inline]
    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.kind == ActivityKind::Probe
    }
}

/// Expected value of a steady-state probe
///
/// Deserializes from the document forms `true`, `200`, `"ok"`, `[200, 204]`,
/// `{"type": "range", "range": [0, 5]}` and `{"type": "regex", "pattern": ".."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tolerance {
    /// Structured tolerance
    Typed(TypedTolerance),
    /// Output must equal one of these values
    OneOf(Vec<Value>),
    /// Output must equal this value
    Exact(Value),
}

impl Tolerance {
    /// Exact match tolerance
    #[inline]
    #[must_use]
    pub fn exact(value: Value) -> Self {
        Self::Exact(value)
    }

    /// Inclusive numeric range tolerance
    #[inline]
    #[must_use]
    pub fn range(lower: f64, upper: f64) -> Self {
        Self::Typed(TypedTolerance::Range {
            range: [lower, upper],
            target: None,
        })
    }

    /// Regex tolerance
    #[inline]
    #[must_use]
    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::Typed(TypedTolerance::Regex {
            pattern: pattern.into(),
            target: None,
        })
    }
}

/// Structured tolerances, optionally targeting one field of an object output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TypedTolerance {
    /// Inclusive numeric range
    Range {
        /// `[lower, upper]`
        range: [f64; 2],
        /// Output field to check
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    /// Regular expression over the string form of the output
    Regex {
        /// Pattern
        pattern: String,
        /// Output field to check
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
}

/// Steady-state hypothesis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Title
    pub title: String,
    /// Tolerance-checked probes, evaluated in order
    #[serde(default)]
    pub probes: Vec<Activity>,
    /// Annotations added by controls
    #[serde(flatten)]
    pub annotations: Annotations,
}

impl Hypothesis {
    /// Create hypothesis
    #[inline]
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Add a probe
    #[inline]
    #[must_use]
    pub fn with_probe(mut self, probe: Activity) -> Self {
        self.probes.push(probe);
        self
    }
}

/// Control declared by an experiment, resolved by name at run start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSpec {
    /// Registered control name
    pub name: String,
    /// Configuration handed to `configure`
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub configuration: Configuration,
}

impl ControlSpec {
    /// Create control declaration
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            configuration: Configuration::new(),
        }
    }
}

/// Declarative experiment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    /// Title
    pub title: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Steady-state hypothesis
    #[serde(
        rename = "steady-state-hypothesis",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub steady_state_hypothesis: Option<Hypothesis>,
    /// Method activities, in order
    #[serde(default)]
    pub method: Vec<Activity>,
    /// Rollback activities, in order
    #[serde(default)]
    pub rollbacks: Vec<Activity>,
    /// Configuration passed to providers and controls
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub configuration: Configuration,
    /// Secrets passed to providers and controls
    #[serde(default, skip_serializing)]
    pub secrets: Secrets,
    /// Declared controls
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub controls: Vec<ControlSpec>,
    /// Annotations added by controls
    #[serde(flatten)]
    pub annotations: Annotations,
}

impl Experiment {
    /// Create experiment
    #[inline]
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// With steady-state hypothesis
    #[inline]
    #[must_use]
    pub fn with_hypothesis(mut self, hypothesis: Hypothesis) -> Self {
        self.steady_state_hypothesis = Some(hypothesis);
        self
    }

    /// Append a method activity
    #[inline]
    #[must_use]
    pub fn with_activity(mut self, activity: Activity) -> Self {
        self.method.push(activity);
        self
    }

    /// Append a rollback activity
    #[inline]
    #[must_use]
    pub fn with_rollback(mut self, activity: Activity) -> Self {
        self.rollbacks.push(activity);
        self
    }

    /// Declare a control
    #[inline]
    #[must_use]
    pub fn with_control(mut self, control: ControlSpec) -> Self {
        self.controls.push(control);
        self
    }

    /// Every activity of the experiment: hypothesis probes, method, rollbacks
    pub fn activities(&self) -> impl Iterator<Item = &Activity> {
        self.steady_state_hypothesis
            .iter()
            .flat_map(|h| h.probes.iter())
            .chain(self.method.iter())
            .chain(self.rollbacks.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn activity_deserializes_with_annotations() {
        let activity: Activity = serde_json::from_value(json!({
            "type": "probe",
            "name": "service-is-up",
            "provider": {"type": "http", "url": "http://localhost:8080/health"},
            "tolerance": 200,
            "pauses": {"after": 1.5},
            "owner": "sre"
        }))
        .unwrap();

        assert!(activity.is_probe());
        assert_eq!(activity.provider.provider_type, "http");
        assert_eq!(
            activity.provider.arguments.get("url"),
            Some(&json!("http://localhost:8080/health"))
        );
        assert_eq!(activity.tolerance, Some(Tolerance::Exact(json!(200))));
        assert_eq!(activity.pauses.unwrap().after, Some(1.5));
        assert!(!activity.background);
        assert_eq!(activity.annotations.get("owner"), Some(&json!("sre")));
    }

    #[test]
    fn tolerance_forms() {
        let range: Tolerance = serde_json::from_value(json!({"type": "range", "range": [0, 5]})).unwrap();
        assert_eq!(range, Tolerance::range(0.0, 5.0));

        let regex: Tolerance = serde_json::from_value(json!({"type": "regex", "pattern": "^ok"})).unwrap();
        assert_eq!(regex, Tolerance::regex("^ok"));

        let list: Tolerance = serde_json::from_value(json!([200, 204])).unwrap();
        assert_eq!(list, Tolerance::OneOf(vec![json!(200), json!(204)]));

        let object: Tolerance = serde_json::from_value(json!({"status": "green"})).unwrap();
        assert_eq!(object, Tolerance::Exact(json!({"status": "green"})));
    }

    #[test]
    fn experiment_document_layout() {
        let experiment = Experiment::new("kill one replica")
            .with_hypothesis(
                Hypothesis::new("service responds")
                    .with_probe(Activity::probe("ping", "http").with_tolerance(Tolerance::exact(json!(true)))),
            )
            .with_activity(Activity::action("kill", "process").in_background())
            .with_rollback(Activity::action("restart", "process"));

        let mut with_secret = experiment.clone();
        with_secret.secrets.insert("token".into(), json!("s3cr3t"));
        let doc = serde_json::to_value(&with_secret).unwrap();

        assert!(doc.get("steady-state-hypothesis").is_some());
        assert_eq!(doc["method"][0]["background"], json!(true));
        assert!(doc.get("secrets").is_none());
        assert_eq!(experiment.activities().count(), 3);
    }
}
