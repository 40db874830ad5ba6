//! Steady-state hypothesis evaluation
//!
//! Probes run in order through the [`ActivityRunner`]. Evaluation stops at
//! the first probe that raises (`errored`) or whose output misses its
//! tolerance (`deviated`).

use crate::activity::ActivityRunner;
use crate::error::{ConfigError, ControlError};
use crate::interruption::Halt;
use crate::journal::{HypothesisOutcome, HypothesisResult, RunStatus};
use crate::types::{Hypothesis, Tolerance, TypedTolerance};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Check every probe carries a usable tolerance
///
/// # Errors
/// `MissingTolerance` or `InvalidTolerance` for the first bad probe
pub fn validate_hypothesis(hypothesis: &Hypothesis) -> Result<(), ConfigError> {
    for probe in &hypothesis.probes {
        let tolerance = probe
            .tolerance
            .as_ref()
            .ok_or_else(|| ConfigError::MissingTolerance(probe.name.clone()))?;
        let invalid = |reason: String| ConfigError::InvalidTolerance {
            probe: probe.name.clone(),
            reason,
        };
        match tolerance {
            Tolerance::Typed(TypedTolerance::Range { range: [lower, upper], .. }) => {
                if !lower.is_finite() || !upper.is_finite() || lower > upper {
                    return Err(invalid(format!("range [{lower}, {upper}] is empty or not finite")));
                }
            }
            Tolerance::Typed(TypedTolerance::Regex { pattern, .. }) => {
                Regex::new(pattern).map_err(|e| invalid(e.to_string()))?;
            }
            Tolerance::OneOf(values) if values.is_empty() => {
                return Err(invalid("empty list of accepted values".to_string()));
            }
            Tolerance::OneOf(_) | Tolerance::Exact(_) => {}
        }
    }
    Ok(())
}

/// Check a probe output against a tolerance
#[must_use]
pub fn within_tolerance(tolerance: &Tolerance, output: &Value) -> bool {
    match tolerance {
        Tolerance::Exact(expected) => matches_value(expected, output),
        Tolerance::OneOf(accepted) => accepted.iter().any(|expected| matches_value(expected, output)),
        Tolerance::Typed(TypedTolerance::Range { range: [lower, upper], target }) => {
            select(output, target.as_deref())
                .and_then(Value::as_f64)
                .is_some_and(|v| *lower <= v && v <= *upper)
        }
        Tolerance::Typed(TypedTolerance::Regex { pattern, target }) => {
            let Some(value) = select(output, target.as_deref()) else {
                return false;
            };
            let Ok(re) = Regex::new(pattern) else {
                return false;
            };
            match value {
                Value::String(s) => re.is_match(s),
                other => re.is_match(&other.to_string()),
            }
        }
    }
}

fn select<'a>(output: &'a Value, target: Option<&str>) -> Option<&'a Value> {
    match target {
        Some(key) => output.get(key),
        None => Some(output),
    }
}

/// Value equality with numeric normalisation. A number tolerance also
/// matches the `status` field of an object output (HTTP-style probes).
fn matches_value(expected: &Value, output: &Value) -> bool {
    match (expected, output) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Number(_), Value::Object(map)) => map
            .get("status")
            .is_some_and(|status| matches_value(expected, status)),
        _ => expected == output,
    }
}

/// Evaluates a hypothesis through an activity runner
#[derive(Clone)]
pub struct HypothesisEvaluator {
    runner: ActivityRunner,
}

impl HypothesisEvaluator {
    /// Create evaluator
    #[must_use]
    pub fn new(runner: ActivityRunner) -> Self {
        Self { runner }
    }

    /// Evaluate every probe in order, bracketed by hypothesis hooks
    ///
    /// # Errors
    /// A failing control hook
    pub async fn evaluate(&self, hypothesis: &Hypothesis, halt: Option<&Halt>) -> Result<HypothesisResult, ControlError> {
        let hooks = self.runner.hooks();
        let mut hypothesis = hypothesis.clone();
        hooks.before_hypothesis(&mut hypothesis).await?;

        let mut outcome = HypothesisOutcome::Satisfied;
        let mut probes = Vec::with_capacity(hypothesis.probes.len());
        for probe in &hypothesis.probes {
            let Some(mut run) = self.runner.run(probe, halt).await? else {
                outcome = HypothesisOutcome::Errored;
                break;
            };
            if run.status != RunStatus::Succeeded {
                warn!("Probe '{}' raised during hypothesis '{}'", probe.name, hypothesis.title);
                outcome = HypothesisOutcome::Errored;
                probes.push(run);
                break;
            }
            // No output means the provider call was skipped by a dry run.
            let met = match (&probe.tolerance, &run.output) {
                (Some(tolerance), Some(output)) => within_tolerance(tolerance, output),
                _ => true,
            };
            run.tolerance_met = Some(met);
            probes.push(run);
            if !met {
                debug!("Probe '{}' is out of tolerance", probe.name);
                outcome = HypothesisOutcome::Deviated;
                break;
            }
        }

        let mut result = HypothesisResult::new(outcome, probes);
        hooks.after_hypothesis(&mut hypothesis, &mut result).await?;
        info!("Steady state hypothesis '{}': {:?}", hypothesis.title, result.outcome);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Activity;
    use serde_json::json;

    #[test]
    fn exact_and_numeric_tolerances() {
        assert!(within_tolerance(&Tolerance::exact(json!(true)), &json!(true)));
        assert!(!within_tolerance(&Tolerance::exact(json!(true)), &json!(false)));
        assert!(within_tolerance(&Tolerance::exact(json!(200)), &json!(200.0)));
        assert!(within_tolerance(&Tolerance::exact(json!(200)), &json!({"status": 200, "body": ""})));
        assert!(within_tolerance(&Tolerance::OneOf(vec![json!(200), json!(204)]), &json!(204)));
        assert!(!within_tolerance(&Tolerance::OneOf(vec![json!(200), json!(204)]), &json!(500)));
    }

    #[test]
    fn range_and_regex_tolerances() {
        assert!(within_tolerance(&Tolerance::range(0.0, 5.0), &json!(5)));
        assert!(!within_tolerance(&Tolerance::range(0.0, 5.0), &json!(5.5)));
        assert!(!within_tolerance(&Tolerance::range(0.0, 5.0), &json!("3")));

        let targeted = Tolerance::Typed(TypedTolerance::Range {
            range: [0.0, 1.0],
            target: Some("error_rate".into()),
        });
        assert!(within_tolerance(&targeted, &json!({"error_rate": 0.2})));
        assert!(!within_tolerance(&targeted, &json!({"latency": 0.2})));

        assert!(within_tolerance(&Tolerance::regex("^ok"), &json!("ok: all good")));
        assert!(within_tolerance(&Tolerance::regex("^2\\d\\d$"), &json!(204)));
    }

    #[test]
    fn validation_rejects_unusable_tolerances() {
        let missing = Hypothesis::new("h").with_probe(Activity::probe("p", "mock"));
        assert_eq!(validate_hypothesis(&missing), Err(ConfigError::MissingTolerance("p".into())));

        let empty_range = Hypothesis::new("h").with_probe(Activity::probe("p", "mock").with_tolerance(Tolerance::range(3.0, 1.0)));
        assert!(matches!(validate_hypothesis(&empty_range), Err(ConfigError::InvalidTolerance { .. })));

        let bad_regex = Hypothesis::new("h").with_probe(Activity::probe("p", "mock").with_tolerance(Tolerance::regex("(")));
        assert!(matches!(validate_hypothesis(&bad_regex), Err(ConfigError::InvalidTolerance { .. })));

        let good = Hypothesis::new("h").with_probe(Activity::probe("p", "mock").with_tolerance(Tolerance::exact(json!(true))));
        assert!(validate_hypothesis(&good).is_ok());
    }
}
