use chaos_core::{
    Activity, ConfigError, DryRun, EventHandlerRegistry, Experiment, ExperimentError, Pauses,
    RollbackStrategy, Schedule, Settings, Strategy, Tolerance,
};
use chaos_test_utils::{executor, experiment, healthy_provider, FIRST_ACTION, PROVIDER};
use pretty_assertions::assert_eq;
use std::io::Write;

async fn config_error(experiment: Experiment, schedule: Schedule) -> ConfigError {
    match executor(healthy_provider())
        .run(experiment, Strategy::Default, &schedule, &Settings::default(), &EventHandlerRegistry::new())
        .await
    {
        Err(ExperimentError::Config(e)) => e,
        other => panic!("expected a configuration error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_schedule_is_rejected_before_running() {
    let err = config_error(experiment(), Schedule::new().with_frequency(0.0)).await;
    assert!(matches!(err, ConfigError::InvalidSchedule(_)));
}

#[tokio::test]
async fn test_unrepresentable_schedule_durations_are_rejected() {
    let err = config_error(experiment(), Schedule::new().with_frequency(1e20)).await;
    assert!(matches!(err, ConfigError::InvalidSchedule(_)));

    let err = config_error(experiment(), Schedule::new().with_cooldown(1e20)).await;
    assert!(matches!(err, ConfigError::InvalidSchedule(_)));
}

#[tokio::test]
async fn test_unrepresentable_activity_pause_is_rejected() {
    let mut exp = experiment();
    exp.method[0].pauses = Some(Pauses {
        before: Some(1e20),
        after: None,
    });
    let err = config_error(exp, Schedule::default()).await;
    assert!(matches!(
        err,
        ConfigError::InvalidActivity { ref activity, .. } if activity == FIRST_ACTION
    ));
}

#[tokio::test]
async fn test_unknown_provider_is_rejected() {
    let exp = experiment().with_activity(Activity::action("reboot", "ssh"));
    let err = config_error(exp, Schedule::default()).await;
    assert_eq!(
        err,
        ConfigError::UnknownProvider {
            activity: "reboot".into(),
            provider_type: "ssh".into(),
        }
    );
}

#[tokio::test]
async fn test_probe_without_tolerance_is_rejected() {
    let mut exp = experiment();
    if let Some(hypothesis) = exp.steady_state_hypothesis.as_mut() {
        hypothesis.probes.push(Activity::probe("latency", PROVIDER));
    }
    let err = config_error(exp, Schedule::default()).await;
    assert_eq!(err, ConfigError::MissingTolerance("latency".into()));
}

#[test]
fn test_settings_load_from_yaml_and_json_files() {
    let dir = tempfile::tempdir().unwrap();

    let yaml = dir.path().join("settings.yaml");
    let mut file = std::fs::File::create(&yaml).unwrap();
    writeln!(file, "runtime:\n  rollbacks:\n    strategy: deviated\n  dry: pause").unwrap();
    let settings = Settings::load(&yaml).unwrap();
    assert_eq!(settings.rollback_strategy(), RollbackStrategy::Deviated);
    assert_eq!(settings.runtime.dry, Some(DryRun::Pause));

    let json = dir.path().join("settings.json");
    std::fs::write(&json, r#"{"runtime": {"rollbacks": {"strategy": "never"}}}"#).unwrap();
    assert_eq!(Settings::load(&json).unwrap().rollback_strategy(), RollbackStrategy::Never);

    let missing = Settings::load(dir.path().join("absent.yaml"));
    assert!(matches!(missing, Err(ConfigError::InvalidSettings(_))));
}

#[test]
fn test_experiment_document_round_trips_through_yaml() {
    let yaml = r#"
title: replica loss is tolerated
description: kill one replica
steady-state-hypothesis:
  title: service is healthy
  probes:
    - type: probe
      name: health
      provider:
        type: http
        url: http://localhost/health
      tolerance: 200
method:
  - type: action
    name: kill-replica
    provider:
      type: process
      path: kill
    background: true
    pauses:
      after: 2
rollbacks: []
controls:
  - name: tracing
"#;
    let experiment: Experiment = serde_yaml::from_str(yaml).unwrap();
    let hypothesis = experiment.steady_state_hypothesis.as_ref().unwrap();
    assert_eq!(hypothesis.probes[0].tolerance, Some(Tolerance::exact(200.into())));
    assert!(experiment.method[0].background);
    assert_eq!(experiment.method[0].pauses.unwrap().after, Some(2.0));
    assert_eq!(experiment.controls[0].name, "tracing");
}
