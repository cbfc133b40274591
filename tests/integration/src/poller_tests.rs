//! Poller timing and reporting against a live HTTP stats endpoint.

use std::time::{Duration, Instant};

use integration_tests::{converged_document, free_port, init_tracing, StatsServer};
use mesh_harness::prelude::*;

#[tokio::test]
async fn presatisfied_returns_well_before_deadline() {
    init_tracing();

    let port = free_port();
    let _server = StatsServer::start(port, vec![converged_document(&[])])
        .await
        .unwrap();
    let source = HttpStatSource::admin(port, Duration::from_secs(1)).unwrap();

    let deadline = Duration::from_secs(20);
    let start = Instant::now();
    ConvergencePoller::default()
        .verify(&source, &standard_xds_expectations(), deadline)
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
}

#[tokio::test]
async fn never_satisfied_waits_out_deadline_and_lists_all() {
    init_tracing();

    let port = free_port();
    let _server = StatsServer::start(
        port,
        vec![r#"{"stats":[{"name":"listener_manager.lds.update_rejected","value":3},{"name":"cluster.xds-grpc.update_failure","value":1}]}"#.into()],
    )
    .await
    .unwrap();
    let source = HttpStatSource::admin(port, Duration::from_secs(1)).unwrap();

    let deadline = Duration::from_millis(700);
    let start = Instant::now();
    let err = ConvergencePoller::default()
        .verify(&source, &standard_xds_expectations(), deadline)
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(elapsed >= deadline, "returned early after {elapsed:?}");
    let HarnessError::ConvergenceTimeout { unmet, .. } = &err else {
        panic!("expected ConvergenceTimeout, got {err}");
    };
    let report: Vec<String> = unmet.iter().map(ToString::to_string).collect();
    assert_eq!(report.len(), 4, "{report:?}");
    assert!(report.contains(&"cluster.xds-grpc.update_failure == 0 (observed 1)".to_string()));
    assert!(report.contains(&"listener_manager.lds.update_rejected == 0 (observed 3)".to_string()));
}

#[tokio::test]
async fn malformed_document_is_unmet_not_fetch_failure() {
    let port = free_port();
    let _server = StatsServer::start(port, vec!["<html>oops</html>".into()])
        .await
        .unwrap();
    let source = HttpStatSource::admin(port, Duration::from_secs(1)).unwrap();

    let err = ConvergencePoller::default()
        .verify(&source, &[Expectation::cds_converged()], Duration::from_millis(300))
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::ConvergenceTimeout { .. }), "{err}");
    assert_eq!(err.unmet_expectations()[0].observed, 0);
}

#[tokio::test]
async fn unreachable_endpoint_is_fetch_failure() {
    let url = format!("http://127.0.0.1:{}{}", free_port(), mesh_harness::poller::STATS_PATH);

    let start = Instant::now();
    let err = verify(&url, &[Expectation::cds_converged()], Duration::from_millis(300))
        .await
        .unwrap_err();

    assert!(start.elapsed() >= Duration::from_millis(300));
    assert!(matches!(err, HarnessError::StatFetchFailed { .. }), "{err}");
    assert!(err.to_string().contains("fetch failed"));
}

#[tokio::test]
async fn port_wait_precedes_first_fetch() {
    let port = free_port();
    let binder = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        StatsServer::start(port, vec![converged_document(&[])]).await.unwrap()
    });

    wait_for_port(port, Duration::from_secs(5)).await.unwrap();
    let _server = binder.await.unwrap();

    let source = HttpStatSource::admin(port, Duration::from_secs(1)).unwrap();
    let result = ConvergencePoller::default()
        .verify(&source, &[Expectation::cds_converged()], Duration::from_secs(5))
        .await
        .unwrap();
    assert!(result.snapshot.value("cluster_manager.cds.update_success") >= 1);
}
