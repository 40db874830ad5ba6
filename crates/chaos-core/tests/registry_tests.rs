use chaos_core::{
    EventHandlerRegistry, Experiment, HypothesisOutcome, HypothesisResult, Journal, Settings,
    Strategy,
};
use chaos_test_utils::{
    executor, experiment, fast_schedule, healthy_provider, FailingHandler, FailureMode,
    RecordingHandler, ALL_EVENTS,
};
use pretty_assertions::assert_eq;

fn dispatch_every_event(registry: &EventHandlerRegistry) {
    let experiment = Experiment::new("registry");
    let journal = Journal::start(experiment.clone());
    let state = HypothesisResult::new(HypothesisOutcome::Satisfied, vec![]);

    registry.started(&experiment, &journal);
    registry.finish(&journal);
    registry.interrupted(&experiment, &journal);
    registry.signal_exit();
    registry.start_continuous_hypothesis(1.0);
    registry.continuous_hypothesis_iteration(1, &state);
    registry.continuous_hypothesis_completed(&experiment, &journal);
    registry.start_method(&experiment);
    registry.method_completed(&experiment, &[]);
    registry.start_rollbacks(&experiment);
    registry.rollbacks_completed(&experiment, &journal);
    registry.start_hypothesis_before(&experiment);
    registry.hypothesis_before_completed(&experiment, &state, &journal);
    registry.start_hypothesis_after(&experiment);
    registry.hypothesis_after_completed(&experiment, &state, &journal);
    registry.start_cooldown(0.0);
    registry.cooldown_completed();
}

#[test]
fn test_run_handler_is_called_on_each_event() {
    let handler = RecordingHandler::new();
    let registry = EventHandlerRegistry::new().with_handler(handler.clone());

    dispatch_every_event(&registry);

    assert_eq!(handler.events(), ALL_EVENTS.to_vec());
}

#[test]
fn test_failing_handlers_do_not_stop_the_registry() {
    let handler = RecordingHandler::new();
    let registry = EventHandlerRegistry::new()
        .with_handler(FailingHandler::new(FailureMode::Error))
        .with_handler(FailingHandler::new(FailureMode::Panic))
        .with_handler(handler.clone());

    dispatch_every_event(&registry);

    assert_eq!(handler.events(), ALL_EVENTS.to_vec());
}

#[test]
fn test_handlers_run_in_registration_order() {
    let first = RecordingHandler::new();
    let second = RecordingHandler::new();
    let mut registry = EventHandlerRegistry::new();
    registry.register(first.clone());
    registry.register(second.clone());
    assert_eq!(registry.len(), 2);

    registry.signal_exit();
    assert_eq!(first.events(), vec!["signal_exit"]);
    assert_eq!(second.events(), vec!["signal_exit"]);
}

#[tokio::test(start_paused = true)]
async fn test_faulty_observer_never_affects_the_run() {
    let handler = RecordingHandler::new();
    let registry = EventHandlerRegistry::new()
        .with_handler(FailingHandler::new(FailureMode::Panic))
        .with_handler(handler.clone());

    let journal = executor(healthy_provider())
        .run(experiment(), Strategy::Default, &fast_schedule(), &Settings::default(), &registry)
        .await
        .unwrap();

    assert_eq!(journal.status, chaos_core::JournalStatus::Completed);
    assert_eq!(
        handler.events(),
        vec![
            "started",
            "start_hypothesis_before",
            "hypothesis_before_completed",
            "start_method",
            "method_completed",
            "start_hypothesis_after",
            "hypothesis_after_completed",
            "finish",
        ]
    );
}
