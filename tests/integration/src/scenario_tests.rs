//! End-to-end scenarios: seed a registry, simulate a push, verify convergence.

use std::sync::Arc;
use std::time::Duration;

use integration_tests::{init_tracing, simulated_pair, test_config, SimulatedProxy};
use mesh_harness::env::fixtures::{SERVICE3, SERVICE4};
use mesh_harness::prelude::*;

fn seed_svc_example(registry: &mut Registry) -> Result<()> {
    registry.add_service(
        "svc.example",
        "10.0.0.1".parse().unwrap(),
        vec![Port::new("http-main", 80, Protocol::Http)],
    )?;
    for (ip, version) in [("10.0.0.11", "v1"), ("10.0.0.12", "v2")] {
        registry.add_instance(
            "svc.example",
            ServiceInstance::builder(ip.parse().unwrap(), 8080, "http-main").label("version", version),
        )?;
    }
    Ok(())
}

/// The canonical scenario against a fixed stats document.
#[tokio::test]
async fn svc_example_converges_on_fixed_snapshot() {
    init_tracing();

    let mut registry = Registry::new();
    seed_svc_example(&mut registry).unwrap();
    let subsets: Vec<_> = registry.version_subsets("svc.example").into_iter().collect();
    assert_eq!(subsets, vec!["v1", "v2"]);

    let source = StaticStatSource::new(
        r#"{"stats":[{"name":"cluster_manager.cds.update_success","value":1},{"name":"listener_manager.lds.update_rejected","value":0}]}"#,
    );
    let result = ConvergencePoller::default()
        .verify(
            &source,
            &[
                Expectation::at_least("cluster_manager.cds.update_success", 1),
                Expectation::equals("listener_manager.lds.update_rejected", 0),
            ],
            Duration::from_secs(5),
        )
        .await
        .expect("scenario should converge");

    assert_eq!(result.attempts, 1);
}

/// The same scenario driven through the environment and a simulated proxy
/// that needs a few polls before it reports the push.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn svc_example_converges_through_environment() {
    init_tracing();

    let (cp, proxy, _log) = simulated_pair(2);
    let manager = EnvironmentManager::with_launchers(test_config(), cp.clone(), proxy.clone())
        .with_seed(seed_svc_example);

    let env = manager.with_proxy().await.unwrap();
    assert_eq!(
        *cp.pushed.lock().unwrap(),
        vec!["outbound|http-main||svc.example".to_string()]
    );

    let cluster = cluster_name(Direction::Outbound, "", "http-main", "svc.example");
    let mut expectations = standard_xds_expectations();
    expectations.push(Expectation::cluster_updated(&cluster));

    let result = env
        .verify(&expectations, Duration::from_secs(10))
        .await
        .expect("simulated proxy should converge");
    assert!(result.attempts >= 2, "attempts = {}", result.attempts);

    manager.teardown().await;
}

/// The default fixture converges on the per-cluster counter for
/// `service3`'s TCP port, and the proxy runs as the configured identity.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fixture_clusters_converge() {
    init_tracing();

    let (cp, proxy, log) = simulated_pair(0);
    let manager = Arc::new(EnvironmentManager::with_launchers(
        test_config(),
        cp.clone(),
        proxy.clone(),
    ));

    let env = manager.with_proxy().await.unwrap();
    assert_eq!(proxy.node.lock().unwrap().as_deref(), Some(env.identity().as_str()));

    let registry = env.registry();
    let service3_custom = cluster_name(Direction::Outbound, "", "custom", SERVICE3);
    assert!(registry.outbound_cluster_names().contains(&service3_custom));
    // service4 shares port 80 with the bundles but still gets its own cluster.
    assert!(registry
        .outbound_cluster_names()
        .contains(&cluster_name(Direction::Outbound, "", "http-main", SERVICE4)));

    let expectations = vec![
        Expectation::cds_converged(),
        Expectation::cluster_updated(&service3_custom),
        Expectation::no_grpc_update_failure(),
        Expectation::lds_not_rejected(),
        Expectation::lds_converged(),
    ];
    env.verify(&expectations, Duration::from_secs(10)).await.unwrap();

    manager.teardown().await;
    assert_eq!(*log.lock().unwrap(), vec!["proxy", "control-plane"]);
}

/// A cluster the proxy never reports is named in the timeout.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_cluster_is_reported_by_name() {
    init_tracing();

    let (cp, proxy, _log) = simulated_pair(0);
    let manager = EnvironmentManager::with_launchers(test_config(), cp, proxy);
    let env = manager.with_proxy().await.unwrap();

    let missing = cluster_name(Direction::Outbound, "v9", "http-main", SERVICE3);
    let err = env
        .verify(
            &[Expectation::cds_converged(), Expectation::cluster_updated(&missing)],
            Duration::from_millis(500),
        )
        .await
        .unwrap_err();

    let unmet = err.unmet_expectations();
    assert_eq!(unmet.len(), 1);
    assert_eq!(unmet[0].counter, cluster_stat(&missing, "update_success"));
    assert!(!unmet[0].present);
    assert!(err.to_string().contains(&missing));

    manager.teardown().await;
}

/// A proxy that never opens its traffic listener fails on that port, not
/// with a convergence timeout.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_listener_is_not_reported_as_unconverged() {
    init_tracing();

    let (cp, _, log) = simulated_pair(0);
    let proxy = Arc::new(SimulatedProxy {
        pushed: Arc::clone(&cp.pushed),
        log,
        without_listener: true,
        ..SimulatedProxy::default()
    });
    let config = test_config();
    let listener_port = config.ports.proxy_listener;
    let manager = EnvironmentManager::with_launchers(config, cp, proxy);
    let env = manager.with_proxy().await.unwrap();

    let err = env
        .verify(&standard_xds_expectations(), Duration::from_millis(300))
        .await
        .unwrap_err();

    assert!(
        matches!(err, HarnessError::PortNotReady { port, .. } if port == listener_port),
        "{err}"
    );

    manager.teardown().await;
}
