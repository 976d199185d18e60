// crates/relayrunners/tests/embedded_test.rs

use relaycore::{RunnerKind, Value, Variables};
use relayrunners::{class_catalog, embedded_catalog};
use relayruntime::engine::{InMemoryEngine, JobOutcome};
use relayruntime::{Filter, RelayRuntime, RunnerState, RuntimeConfig};
use std::sync::Arc;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

fn runtime(config: RuntimeConfig) -> (RelayRuntime, InMemoryEngine) {
    init_tracing();
    let engine = InMemoryEngine::new();
    let runtime = RelayRuntime::builder(config, Arc::new(engine.clone()))
        .embedded(embedded_catalog())
        .class_catalog(class_catalog())
        .build();
    (runtime, engine)
}

fn config() -> RuntimeConfig {
    RuntimeConfig {
        close_timeout_secs: 1,
        close_poll_interval_ms: 10,
        ..RuntimeConfig::default()
    }
}

#[tokio::test]
async fn test_every_embedded_runner_is_registered() {
    let catalog = embedded_catalog();
    let mut types = catalog.list_runner_types();
    types.sort();
    assert_eq!(
        types,
        vec![
            "c-basic-ping",
            "c-basic-weather",
            "c-http-request",
            "c-pingconnector",
            "c-pingworker",
            "c-sdk-echo",
            "c-set-variables",
        ]
    );

    let echo = catalog.runner_by_type("c-sdk-echo").unwrap();
    assert_eq!(echo.kind(), RunnerKind::WrappedFunction);
    for (_, runner) in catalog.runners() {
        assert!(
            runner.check_valid_definition().is_empty(),
            "{} has an invalid definition",
            runner.identification()
        );
    }
}

#[tokio::test]
async fn test_framework_runners_can_be_held_back() {
    let (runtime, _engine) = runtime(RuntimeConfig {
        start_framework_runners: false,
        ..config()
    });

    let started = runtime.start().await.unwrap();
    assert_eq!(started, 4, "only the non framework runners start");
    assert_eq!(runtime.dispatch().runner_state("c-pingworker").await, RunnerState::Stopped);
    assert_eq!(runtime.dispatch().runner_state("c-http-request").await, RunnerState::Active);

    let framework = runtime.discovery().get_all_runners(&Filter::all().framework_only()).await;
    assert_eq!(framework.len(), 3);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_jobs_flow_through_the_embedded_runners() {
    let (runtime, engine) = runtime(config());
    assert_eq!(runtime.start().await.unwrap(), 7);

    let mut variables = Variables::new();
    variables.insert("operations".to_string(), Value::from("total=12;label=\"done\""));
    match engine.run_job("c-set-variables", variables).await.unwrap() {
        JobOutcome::Completed(result) => {
            assert_eq!(result.get("total"), Some(&Value::from(12i64)));
            assert_eq!(result.get("label"), Some(&Value::from("done")));
        }
        other => panic!("expected completion, got {:?}", other),
    }

    let mut variables = Variables::new();
    variables.insert("throwErrorPlease".to_string(), Value::Bool(true));
    let outcome = engine.run_job("c-basic-ping", variables).await.unwrap();
    assert_eq!(
        outcome,
        JobOutcome::DomainError {
            code: "BAD_WEATHER".to_string(),
            message: "Weather is rainy".to_string()
        }
    );

    let mut variables = Variables::new();
    variables.insert("message".to_string(), Value::from("ping"));
    let job = engine
        .next_job("c-sdk-echo", variables)
        .with_header("resultVariable", "answer");
    match engine.run_activated(job).await.unwrap() {
        JobOutcome::Completed(result) => {
            let answer = result.get("answer").and_then(Value::as_object).unwrap();
            assert_eq!(answer.get("echo"), Some(&Value::from("ping")));
        }
        other => panic!("expected completion, got {:?}", other),
    }

    match engine.run_job("c-basic-weather", Variables::new()).await.unwrap() {
        JobOutcome::Completed(result) => assert_eq!(result.get("humidity"), Some(&Value::from("75%"))),
        other => panic!("expected completion, got {:?}", other),
    }

    let statistic = runtime
        .history()
        .statistic("c-basic-ping", chrono::Utc::now() - chrono::Duration::hours(1))
        .await;
    assert_eq!(statistic.domain_errors, 1);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_class_catalog_builds_every_component() {
    let classes = class_catalog();
    for name in [
        "relayrunners::PingWorker",
        "relayrunners::PingConnector",
        "relayrunners::SetVariablesWorker",
        "relayrunners::HttpRequestConnector",
        "relayrunners::BasicPingHandlers",
        "relayrunners::SdkEchoFunction",
    ] {
        assert!(classes.instantiate(name).is_ok(), "{} should instantiate", name);
    }
    assert!(classes.instantiate("relayrunners::Nothing").is_err());
}
