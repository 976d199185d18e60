// crates/relaycore/tests/iggy_history_test.rs

use relaycore::{ExecutionRecord, ExecutorKind, HistorySink, IggyHistoryConfig, IggyHistorySink};
use uuid::Uuid;

async fn iggy_available() -> bool {
    tokio::net::TcpStream::connect("127.0.0.1:8090").await.is_ok()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

fn config() -> IggyHistoryConfig {
    IggyHistoryConfig {
        stream_name: format!("relay_test_{}", Uuid::new_v4()),
        ..IggyHistoryConfig::default()
    }
}

#[tokio::test]
#[ignore] // needs an Iggy server on 127.0.0.1:8090
async fn test_history_sink_connects() {
    init_tracing();
    if !iggy_available().await {
        println!("Skipping test: Iggy server not available at 127.0.0.1:8090");
        return;
    }

    let sink = IggyHistorySink::connect(config()).await;
    assert!(sink.is_ok(), "should connect to the Iggy server: {:?}", sink.err());
}

#[tokio::test]
#[ignore]
async fn test_published_records_are_read_back() {
    init_tracing();
    if !iggy_available().await {
        println!("Skipping test: Iggy server not available");
        return;
    }

    let sink = IggyHistorySink::connect(config()).await.expect("connect");
    let record = ExecutionRecord::success("c-pingworker", ExecutorKind::Worker, 42);
    sink.publish(&record).await.expect("publish");

    let subscription = sink.subscribe(format!("reader_{}", Uuid::new_v4()));
    let records = tokio::time::timeout(std::time::Duration::from_secs(5), subscription.poll())
        .await
        .expect("poll timed out")
        .expect("poll");
    assert_eq!(records, vec![record]);
}

#[tokio::test]
#[ignore]
async fn test_sink_swallows_publish_errors() {
    init_tracing();
    if !iggy_available().await {
        println!("Skipping test: Iggy server not available");
        return;
    }

    let sink = IggyHistorySink::connect(config()).await.expect("connect");
    // never panics, never reports to the caller
    for duration in [1, 2, 3] {
        sink.save_execution(ExecutionRecord::success("c-set-variables", ExecutorKind::Worker, duration))
            .await;
    }
}
