use chaos_core::{
    DryRun, EventHandlerRegistry, JournalStatus, RunStatus, Schedule, Settings, Strategy,
};
use chaos_test_utils::{
    executor, experiment, experiment_without_method, fast_schedule, healthy_provider,
    init_test_tracing, ScriptedProvider, Step, FIRST_ACTION, SECOND_ACTION, STEADY_PROBE,
};
use pretty_assertions::assert_eq;

async fn run(strategy: Strategy, provider: ScriptedProvider) -> chaos_core::Journal {
    executor(provider)
        .run(
            experiment(),
            strategy,
            &fast_schedule(),
            &Settings::default(),
            &EventHandlerRegistry::new(),
        )
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_phase_presence_per_strategy() {
    init_test_tracing();

    for strategy in Strategy::ALL {
        let journal = run(strategy, healthy_provider()).await;
        let states = &journal.steady_states;

        assert_eq!(states.before.is_some(), strategy.runs_before(), "before under {strategy}");
        assert_eq!(states.after.is_some(), strategy.runs_after(), "after under {strategy}");
        assert_eq!(states.during.is_some(), strategy.runs_during(), "during under {strategy}");
        assert_eq!(journal.status, JournalStatus::Completed, "status under {strategy}");
        assert!(!journal.deviated);
        assert_eq!(journal.run.len(), 2);
        assert!(journal.end.is_some());
    }
}

#[tokio::test(start_paused = true)]
async fn test_before_method_only() {
    let journal = run(Strategy::BeforeMethod, healthy_provider()).await;
    assert!(journal.steady_states.before.is_some());
    assert!(journal.steady_states.after.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_after_method_only() {
    let journal = run(Strategy::AfterMethod, healthy_provider()).await;
    assert!(journal.steady_states.before.is_none());
    assert!(journal.steady_states.after.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_during_method_checks_after_each_activity() {
    let provider = healthy_provider();
    let journal = run(Strategy::DuringMethod, provider).await;

    let during = journal.steady_states.during.unwrap();
    assert_eq!(during.len(), 2);
    assert!(during.iter().all(|state| state.steady_state_met));
    assert!(journal.steady_states.before.is_none());
    assert!(journal.steady_states.after.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_during_list_is_empty_without_method() {
    for strategy in [Strategy::DuringMethod, Strategy::Continuous] {
        let journal = executor(healthy_provider())
            .run(
                experiment_without_method(),
                strategy,
                &fast_schedule(),
                &Settings::default(),
                &EventHandlerRegistry::new(),
            )
            .await
            .unwrap();

        assert!(journal.run.is_empty());
        let during = journal.steady_states.during.expect("during is a list");
        if strategy == Strategy::DuringMethod {
            assert!(during.is_empty());
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_before_check_raising_skips_method() {
    let provider = healthy_provider().respond(STEADY_PROBE, Step::Fail("probe crashed".into()));
    let journal = run(Strategy::Default, provider).await;

    let before = journal.steady_states.before.as_ref().unwrap();
    assert!(before.errored());
    assert!(journal.run.is_empty());
    assert!(journal.steady_states.after.is_none());
    assert_eq!(journal.status, JournalStatus::Failed);
    assert!(!journal.deviated);
}

#[tokio::test(start_paused = true)]
async fn test_before_check_out_of_tolerance_skips_method() {
    let provider = healthy_provider().respond(STEADY_PROBE, Step::Return(false.into()));
    let journal = run(Strategy::BeforeMethod, provider).await;

    let before = journal.steady_states.before.as_ref().unwrap();
    assert!(before.deviated());
    assert_eq!(before.probes[0].tolerance_met, Some(false));
    assert!(journal.run.is_empty());
    assert_eq!(journal.status, JournalStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_after_check_deviation_fails_the_run() {
    let provider = healthy_provider().sequence(
        STEADY_PROBE,
        vec![Step::Return(true.into())],
        Step::Return(false.into()),
    );
    let journal = run(Strategy::Default, provider).await;

    assert!(journal.steady_states.before.as_ref().unwrap().steady_state_met);
    assert!(!journal.steady_states.after.as_ref().unwrap().steady_state_met);
    assert_eq!(journal.run.len(), 2);
    assert_eq!(journal.status, JournalStatus::Failed);
    assert!(!journal.deviated);
}

#[tokio::test(start_paused = true)]
async fn test_activity_exception_is_recorded_not_fatal() {
    let provider = healthy_provider().respond(SECOND_ACTION, Step::Fail("oops".into()));
    let journal = run(Strategy::Continuous, provider).await;

    assert_eq!(journal.status, JournalStatus::Completed);
    assert!(!journal.deviated);
    assert_eq!(journal.run.len(), 2);
    let last = journal.run.last().unwrap();
    assert_eq!(last.status, RunStatus::Failed);
    assert!(last.exception.as_ref().unwrap().last().unwrap().contains("oops"));
}

#[tokio::test(start_paused = true)]
async fn test_activity_timeout_is_a_failure() {
    let provider = healthy_provider();
    let mut exp = experiment();
    exp.method[0] = exp.method[0].clone().with_timeout(0.1);

    let journal = executor(provider)
        .run(exp, Strategy::Default, &Schedule::default(), &Settings::default(), &EventHandlerRegistry::new())
        .await
        .unwrap();

    assert_eq!(journal.run[0].activity.name, FIRST_ACTION);
    assert_eq!(journal.run[0].status, RunStatus::Failed);
    assert!(journal.run[0].exception.as_ref().unwrap()[0].contains("timed out"));
    assert_eq!(journal.run[1].status, RunStatus::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_skips_actions() {
    let provider = std::sync::Arc::new(healthy_provider());
    let journal = chaos_core::Executor::builder()
        .provider(chaos_test_utils::PROVIDER, provider.clone())
        .build()
        .run(
            experiment(),
            Strategy::Default,
            &Schedule::default(),
            &Settings::default().with_dry_run(DryRun::Actions),
            &EventHandlerRegistry::new(),
        )
        .await
        .unwrap();

    assert_eq!(journal.run.len(), 2);
    assert!(journal.run.iter().all(|r| r.status == RunStatus::Succeeded && r.output.is_none()));
    assert_eq!(provider.call_count(FIRST_ACTION), 0);
    assert_eq!(provider.call_count(STEADY_PROBE), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_probes_keep_the_steady_state() {
    let journal = executor(healthy_provider())
        .run(
            experiment(),
            Strategy::Default,
            &Schedule::default(),
            &Settings::default().with_dry_run(DryRun::Probes),
            &EventHandlerRegistry::new(),
        )
        .await
        .unwrap();

    assert_eq!(journal.status, JournalStatus::Completed);
    let before = journal.steady_states.before.as_ref().unwrap();
    assert!(before.steady_state_met);
    assert!(before.probes.iter().all(|p| p.output.is_none()));
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_runs_between_method_and_after_check() {
    let handler = chaos_test_utils::RecordingHandler::new();
    let registry = EventHandlerRegistry::new().with_handler(handler.clone());

    let journal = executor(healthy_provider())
        .run(
            experiment(),
            Strategy::Default,
            &Schedule::new().with_cooldown(2.0),
            &Settings::default(),
            &registry,
        )
        .await
        .unwrap();

    assert_eq!(journal.status, JournalStatus::Completed);
    let events = handler.events();
    let position = |name: &str| events.iter().position(|e| *e == name).unwrap();
    assert!(position("method_completed") < position("start_cooldown"));
    assert!(position("cooldown_completed") < position("start_hypothesis_after"));
}
