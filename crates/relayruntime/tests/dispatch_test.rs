// crates/relayruntime/tests/dispatch_test.rs

mod common;

use async_trait::async_trait;
use common::{catalog, fast_config, init_tracing, InvalidWorker};
use relaycore::{ActivatedJob, JobHandlerFn, JobWorkerMethod, OperationError, Runner, RunnerError, Variables};
use relayruntime::engine::InMemoryEngine;
use relayruntime::{Component, OperationKind, Origin, RelayRuntime, RunnerDefinition, RunnerState};
use std::sync::Arc;

async fn started_runtime() -> (RelayRuntime, InMemoryEngine) {
    init_tracing();
    let engine = InMemoryEngine::new();
    let runtime = RelayRuntime::builder(fast_config(), Arc::new(engine.clone()))
        .embedded(catalog())
        .build();
    let started = runtime.start().await.expect("runtime should start");
    assert_eq!(started, 2, "folder worker and echo connector should be started");
    (runtime, engine)
}

#[tokio::test]
async fn test_start_all_subscribes_valid_runners() {
    let (runtime, engine) = started_runtime().await;
    let dispatch = runtime.dispatch();

    assert_eq!(engine.open_subscriptions("t-folder"), 1);
    assert_eq!(engine.open_subscriptions("t-echo"), 1);
    assert_eq!(dispatch.runner_state("t-folder").await, RunnerState::Active);
    assert_eq!(dispatch.runner_state("t-invalid").await, RunnerState::Unregistered);
    assert_eq!(dispatch.running_types().await, vec!["t-echo".to_string(), "t-folder".to_string()]);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let (runtime, engine) = started_runtime().await;

    let result = runtime.dispatch().start_runner("t-folder").await;
    assert!(matches!(result, Err(OperationError::AlreadyStarted(_))));
    assert_eq!(engine.open_subscriptions("t-folder"), 1, "no second subscription");

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_stop_removes_the_subscription() {
    let (runtime, engine) = started_runtime().await;
    let dispatch = runtime.dispatch();

    let id = dispatch.subscription_id("t-folder").await.unwrap();
    dispatch.stop_runner("t-folder").await.unwrap();

    assert!(!dispatch.is_running("t-folder").await);
    assert!(engine.is_subscription_closed(id));
    assert_eq!(dispatch.runner_state("t-folder").await, RunnerState::Stopped);

    let definition = runtime.discovery().storage().definition("FolderWorker").await.unwrap();
    assert!(!definition.active, "a stopped runner is flagged inactive");

    let again = dispatch.stop_runner("t-folder").await;
    assert_eq!(again.unwrap_err().code(), "ALREADY_STOPPED");

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_restart_creates_a_new_handle() {
    let (runtime, _engine) = started_runtime().await;
    let dispatch = runtime.dispatch();

    let first = dispatch.subscription_id("t-folder").await.unwrap();
    dispatch.stop_runner("t-folder").await.unwrap();
    dispatch.start_runner("t-folder").await.unwrap();
    let second = dispatch.subscription_id("t-folder").await.unwrap();

    assert_ne!(first, second);
    assert_eq!(dispatch.runner_state("t-folder").await, RunnerState::Active);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_invalid_definition_is_never_subscribed() {
    let (runtime, engine) = started_runtime().await;

    runtime
        .discovery()
        .storage()
        .save_embedded_runner(&Runner::worker(InvalidWorker::new()), "tests::InvalidWorker")
        .await;

    let error = runtime.dispatch().start_runner("t-invalid").await.unwrap_err();
    assert_eq!(error.code(), "INVALID_DEFINITION");
    assert!(error.to_string().contains("defined multiple time"));
    assert_eq!(engine.open_subscriptions("t-invalid"), 0);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_unknown_type_is_not_found() {
    let (runtime, _engine) = started_runtime().await;

    let error = runtime.dispatch().start_runner("t-nothing").await.unwrap_err();
    assert_eq!(error.code(), "NOT_FOUND");
    assert_eq!(error.human_information(), "Code: [NOT_FOUND] No runner found for [t-nothing]");

    runtime.shutdown().await;
}

struct Twin;

#[async_trait]
impl JobHandlerFn for Twin {
    async fn handle(&self, _job: &ActivatedJob) -> Result<Variables, RunnerError> {
        Ok(Variables::new())
    }
}

#[tokio::test]
async fn test_two_runners_for_one_type() {
    init_tracing();
    let engine = InMemoryEngine::new();
    let mut embedded = catalog();
    embedded.register(
        "tests::Twin",
        Component::Handlers(vec![JobWorkerMethod {
            runner_type: "t-folder".to_string(),
            name: Some("FolderTwin".to_string()),
            fetch_variables: None,
            handler: Arc::new(Twin),
        }]),
    );
    let runtime = RelayRuntime::builder(fast_config(), Arc::new(engine.clone()))
        .embedded(embedded)
        .build();
    runtime.discovery().init().await.unwrap();
    runtime.container().start().await.unwrap();

    let error = runtime.dispatch().start_runner("t-folder").await.unwrap_err();
    assert!(matches!(error, OperationError::TooManyMatches { count: 2, .. }));
    assert_eq!(error.code(), "TOO_MANY");

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_unconfirmed_close_keeps_the_runner() {
    let (runtime, engine) = started_runtime().await;
    let dispatch = runtime.dispatch();

    engine.hold_close(true);
    let error = dispatch.stop_runner("t-folder").await.unwrap_err();
    assert_eq!(error.code(), "CANT_STOP");
    assert!(dispatch.is_running("t-folder").await);
    assert_eq!(dispatch.runner_state("t-folder").await, RunnerState::Active);

    engine.hold_close(false);
    dispatch.stop_runner("t-folder").await.unwrap();
    assert_eq!(dispatch.runner_state("t-folder").await, RunnerState::Stopped);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_thread_change_recreates_subscriptions() {
    let (runtime, engine) = started_runtime().await;
    let dispatch = runtime.dispatch();
    let before = dispatch.subscription_id("t-folder").await.unwrap();

    dispatch.set_number_of_threads(4).await.unwrap();

    assert_eq!(engine.worker_threads(), Some(4));
    assert_eq!(engine.connections(), 2, "the client is rebuilt");
    assert_eq!(dispatch.number_of_threads().await, 4);
    assert_eq!(dispatch.runner_state("t-folder").await, RunnerState::Active);
    assert_eq!(dispatch.runner_state("t-echo").await, RunnerState::Active);
    assert_eq!(engine.open_subscriptions("t-folder"), 1);
    assert_ne!(dispatch.subscription_id("t-folder").await.unwrap(), before);

    let kinds: Vec<OperationKind> = runtime.operations().entries().iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&OperationKind::SetThreads));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_thread_change_leaves_failing_runner_stopped() {
    let (runtime, engine) = started_runtime().await;
    let dispatch = runtime.dispatch();

    engine.refuse_subscriptions("t-echo");
    dispatch.set_number_of_threads(2).await.unwrap();

    assert_eq!(dispatch.runner_state("t-folder").await, RunnerState::Active);
    assert_eq!(dispatch.runner_state("t-echo").await, RunnerState::Stopped);
    assert!(!dispatch.is_running("t-echo").await);

    engine.accept_subscriptions("t-echo");
    dispatch.start_runner("t-echo").await.unwrap();
    assert_eq!(dispatch.runner_state("t-echo").await, RunnerState::Active);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_thread_change_parks_an_unconfirmed_close() {
    let (runtime, engine) = started_runtime().await;
    let dispatch = runtime.dispatch();
    let old = dispatch.subscription_id("t-folder").await.unwrap();

    engine.hold_close(true);
    dispatch.set_number_of_threads(3).await.unwrap();

    assert_eq!(dispatch.runner_state("t-folder").await, RunnerState::Stopped);
    assert_eq!(dispatch.subscription_id("t-folder").await, None, "no new handle beside the old one");
    assert!(!engine.is_subscription_closed(old));
    assert_eq!(engine.open_subscriptions("t-folder"), 0);
    assert_eq!(
        dispatch.pending_close_types(),
        vec!["t-echo".to_string(), "t-folder".to_string()]
    );
    assert!(runtime
        .operations()
        .entries()
        .iter()
        .any(|e| e.kind == OperationKind::Error && e.runner_type.as_deref() == Some("t-folder")));

    let error = dispatch.start_runner("t-folder").await.unwrap_err();
    assert_eq!(error.code(), "CANT_STOP");

    engine.hold_close(false);
    dispatch.start_runner("t-folder").await.unwrap();
    assert_eq!(dispatch.runner_state("t-folder").await, RunnerState::Active);
    assert_ne!(dispatch.subscription_id("t-folder").await.unwrap(), old);
    assert_eq!(engine.worker_threads(), Some(3));
    assert!(engine.is_subscription_closed(old));
    assert!(dispatch.pending_close_types().is_empty());

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_starts_subscribe_once() {
    let (runtime, engine) = started_runtime().await;
    let dispatch = runtime.dispatch();
    dispatch.stop_runner("t-folder").await.unwrap();

    let (first, second) = tokio::join!(dispatch.start_runner("t-folder"), dispatch.start_runner("t-folder"));
    let codes: Vec<&str> = [&first, &second]
        .iter()
        .filter_map(|r| r.as_ref().err().map(|e| e.code()))
        .collect();
    assert_eq!(codes, vec!["ALREADY_STARTED"]);
    assert!(first.is_ok() || second.is_ok());
    assert_eq!(engine.open_subscriptions("t-folder"), 1);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_definition_without_runner_is_unknown_kind() {
    let (runtime, engine) = started_runtime().await;

    runtime
        .discovery()
        .storage()
        .save_definition(RunnerDefinition {
            name: "GhostWorker".to_string(),
            runner_type: "t-ghost".to_string(),
            class_name: "tests::GhostWorker".to_string(),
            collection_name: None,
            origin: Origin::Embedded,
            archive: None,
            active: true,
            framework_runner: false,
        })
        .await;

    let error = runtime.dispatch().start_runner("t-ghost").await.unwrap_err();
    assert_eq!(error.code(), "UNKNOWN_RUNNER_KIND");
    assert_eq!(engine.open_subscriptions("t-ghost"), 0);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_closed_subscriptions_are_forgotten() {
    let (runtime, engine) = started_runtime().await;
    let dispatch = runtime.dispatch();
    assert_eq!(engine.tracked_subscriptions(), 2);

    for _ in 0..3 {
        dispatch.stop_runner("t-folder").await.unwrap();
        dispatch.start_runner("t-folder").await.unwrap();
    }
    assert_eq!(engine.tracked_subscriptions(), 2);

    runtime.shutdown().await;
    assert_eq!(engine.tracked_subscriptions(), 0);
}

#[tokio::test]
async fn test_start_fails_without_engine() {
    init_tracing();
    let engine = InMemoryEngine::new();
    engine.set_reachable(false);
    let runtime = RelayRuntime::builder(fast_config(), Arc::new(engine.clone()))
        .embedded(catalog())
        .build();

    assert!(runtime.start().await.is_err());
    assert_eq!(engine.open_subscriptions("t-folder"), 0);
    assert!(!runtime.container().is_ok().await);
    assert!(runtime
        .operations()
        .entries()
        .iter()
        .any(|e| e.kind == OperationKind::Error));
}

#[tokio::test]
async fn test_stop_all_stops_everything() {
    let (runtime, engine) = started_runtime().await;

    runtime.shutdown().await;

    assert_eq!(runtime.dispatch().runner_state("t-folder").await, RunnerState::Stopped);
    assert_eq!(runtime.dispatch().runner_state("t-echo").await, RunnerState::Stopped);
    assert!(runtime.dispatch().running_types().await.is_empty());
    assert_eq!(engine.worker_threads(), None);
    assert!(!runtime.container().is_ok().await);
}
