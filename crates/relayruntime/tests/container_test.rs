// crates/relayruntime/tests/container_test.rs

mod common;

use common::init_tracing;
use relaycore::{EventBus, RuntimeEvent};
use relayruntime::engine::{EngineError, InMemoryEngine};
use relayruntime::{ClientConfig, ContainerError, ContainerState, JobClientContainer};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn container(engine: &InMemoryEngine, config: ClientConfig) -> (Arc<JobClientContainer>, Arc<EventBus>) {
    init_tracing();
    let events = Arc::new(EventBus::new(32));
    let container = Arc::new(JobClientContainer::new(
        Arc::new(engine.clone()),
        config,
        events.clone(),
    ));
    (container, events)
}

#[tokio::test]
async fn test_connects_with_the_configured_threads() {
    let engine = InMemoryEngine::new();
    let config = ClientConfig {
        worker_threads: 3,
        ..ClientConfig::default()
    };
    let (container, _events) = container(&engine, config);

    assert_eq!(container.state().await, ContainerState::Disconnected);
    container.start().await.unwrap();
    assert_eq!(container.state().await, ContainerState::Connected);
    assert_eq!(container.active_threads().await, 3);
    assert_eq!(engine.worker_threads(), Some(3));
    assert!(container.check_connectivity().await);

    container.stop().await;
    assert_eq!(container.state().await, ContainerState::Disconnected);
    assert!(matches!(container.client().await, Err(EngineError::NotConnected)));
}

#[tokio::test]
async fn test_incomplete_cloud_configuration() {
    let engine = InMemoryEngine::new();
    let config = ClientConfig {
        cloud_client_id: Some("client".to_string()),
        ..ClientConfig::default()
    };
    let (container, _events) = container(&engine, config);

    match container.start().await {
        Err(ContainerError::InvalidConfiguration(errors)) => {
            assert!(errors.contains(&"Missing region;".to_string()));
            assert!(errors.contains(&"Missing clientSecret;".to_string()));
        }
        other => panic!("expected a configuration error, got {:?}", other),
    }
    assert_eq!(container.state().await, ContainerState::Disconnected);
    assert_eq!(engine.connections(), 0);
}

#[tokio::test]
async fn test_unreachable_engine() {
    let engine = InMemoryEngine::new();
    engine.set_reachable(false);
    let (container, _events) = container(&engine, ClientConfig::default());

    assert!(container.start().await.is_err());
    assert!(!container.is_ok().await);

    engine.set_reachable(true);
    container.retry_connection().await.unwrap();
    assert!(container.is_ok().await);
}

#[tokio::test]
async fn test_thread_count_waits_for_a_restart() {
    let engine = InMemoryEngine::new();
    let (container, _events) = container(&engine, ClientConfig::default());
    container.start().await.unwrap();

    container.set_thread_count(5).await;
    assert_eq!(container.active_threads().await, 1);
    assert_eq!(container.configured_threads().await, 5);

    container.retry_connection().await.unwrap();
    assert_eq!(container.active_threads().await, 5);
    assert_eq!(engine.worker_threads(), Some(5));
}

#[tokio::test]
async fn test_health_check_reports_transitions() {
    let engine = InMemoryEngine::new();
    let (container, events) = container(&engine, ClientConfig::default());
    container.start().await.unwrap();
    let mut receiver = events.subscribe();

    let cancel = CancellationToken::new();
    let handle = container.spawn_health_check(Duration::from_millis(20), cancel.clone());

    let first = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(first, RuntimeEvent::ConnectionChanged { connected: true, .. }));

    engine.set_reachable(false);
    let lost = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(lost, RuntimeEvent::ConnectionChanged { connected: false, .. }));
    assert_eq!(container.state().await, ContainerState::Connected, "detection only");

    cancel.cancel();
    handle.await.unwrap();
}
