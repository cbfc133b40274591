//! Integration tests with a real control plane and Envoy.
//!
//! Every case shares one control plane and one Envoy, started by the first
//! case that needs them and stopped once after the last case. The binary is
//! built with `harness = false`; [`Suite::main`] stands in for libtest.

use std::process::ExitCode;
use std::time::Duration;

use envoy_tests::harness::{suite, TestHarness};
use mesh_harness::env::fixtures::SERVICE3;
use mesh_harness::prelude::*;
use tracing_subscriber::FmtSubscriber;

/// Initialize tracing for tests.
fn init_tracing() {
    let _ = FmtSubscriber::builder()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

fn main() -> ExitCode {
    init_tracing();

    suite()
        .proxy_case("test_envoy_converges_on_fixture", test_envoy_converges_on_fixture)
        .proxy_case(
            "test_envoy_receives_registry_clusters",
            test_envoy_receives_registry_clusters,
        )
        .proxy_case("test_envoy_receives_listeners", test_envoy_receives_listeners)
        .proxy_case(
            "test_envoy_reports_bootstrap_identity",
            test_envoy_reports_bootstrap_identity,
        )
        .case("test_registry_is_seeded", test_registry_is_seeded)
        .main(SuiteArgs::from_env())
}

/// Envoy connects to the control plane and applies clusters and listeners.
///
/// This test:
/// 1. Waits for Envoy to report ready
/// 2. Polls stats until CDS and LDS report success with no rejections
/// 3. Checks the per-cluster counter for `service3`'s TCP port
async fn test_envoy_converges_on_fixture(env: std::sync::Arc<SharedEnvironment>) {
    let harness = TestHarness::new(&env);
    harness
        .wait_for_envoy(Duration::from_secs(30))
        .await
        .expect("Envoy did not become ready");

    let service3_custom = cluster_name(Direction::Outbound, "", "custom", SERVICE3);
    let mut expectations = standard_xds_expectations();
    expectations.push(Expectation::cluster_updated(&service3_custom));

    let result = env.verify(&expectations, Duration::from_secs(30)).await;
    if let Err(e) = &result {
        for unmet in e.unmet_expectations() {
            tracing::error!(%unmet, "not converged");
        }
    }
    let convergence = result.expect("Envoy did not converge");
    tracing::info!(attempts = convergence.attempts, elapsed = ?convergence.elapsed, "converged");
}

/// Every outbound cluster derived from the registry shows up in Envoy.
async fn test_envoy_receives_registry_clusters(env: std::sync::Arc<SharedEnvironment>) {
    let harness = TestHarness::new(&env);
    harness
        .wait_for_envoy(Duration::from_secs(30))
        .await
        .expect("Envoy did not become ready");

    let expected = env.registry().outbound_cluster_names();
    if let Err(missing) = harness
        .wait_for_clusters(&expected, Duration::from_secs(30))
        .await
    {
        panic!("clusters never arrived: {missing:?}");
    }
}

/// Listeners for every distinct registry port are configured.
async fn test_envoy_receives_listeners(env: std::sync::Arc<SharedEnvironment>) {
    env.verify(
        &[Expectation::lds_converged(), Expectation::lds_not_rejected()],
        Duration::from_secs(30),
    )
    .await
    .expect("LDS did not converge");

    let listeners = TestHarness::new(&env)
        .get_envoy_listeners()
        .await
        .expect("failed to get listeners");
    tracing::info!(
        "Listeners: {}",
        serde_json::to_string_pretty(&listeners).unwrap_or_default()
    );
}

/// The node the control plane sees is the identity Envoy was started with.
async fn test_envoy_reports_bootstrap_identity(env: std::sync::Arc<SharedEnvironment>) {
    let harness = TestHarness::new(&env);
    harness
        .wait_for_envoy(Duration::from_secs(30))
        .await
        .expect("Envoy did not become ready");

    let config_dump = harness
        .get_envoy_config_dump()
        .await
        .expect("failed to get config dump");
    assert!(
        config_dump.to_string().contains(env.identity().as_str()),
        "bootstrap node id should be {}",
        env.identity()
    );
}

/// Registry-only cases join the same environment without starting Envoy.
async fn test_registry_is_seeded(env: std::sync::Arc<SharedEnvironment>) {
    assert_eq!(env.registry().instances(SERVICE3).len(), 2);
    assert_eq!(env.bootstrap().service_node, env.identity().as_str());
}
