//! Test harness for Envoy integration tests.
//!
//! Provides utilities for:
//! - Building the one [`Suite`] this test binary runs
//! - Reading the Envoy admin API
//! - Waiting for Envoy to sync, bounded by a [`Deadline`]

use std::path::PathBuf;
use std::time::Duration;

use mesh_harness::prelude::*;
use tracing::{info, warn};

/// First sleep between admin API polls.
const INITIAL_POLL: Duration = Duration::from_millis(100);

/// Longest sleep between admin API polls.
const MAX_POLL: Duration = Duration::from_secs(1);

/// Bootstrap template shipped with this crate.
pub fn default_template() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata/envoy_bootstrap.json")
}

/// Configuration from `MESH_HARNESS_*` overrides, falling back to the
/// bundled bootstrap template.
pub fn config() -> EnvironmentConfig {
    let mut config = EnvironmentConfig::from_env();
    if std::env::var_os(mesh_harness::env::ENV_BOOTSTRAP_TEMPLATE).is_none() {
        config.bootstrap_template = default_template();
    }
    config
}

/// The suite every case in this binary joins. One manager, one teardown.
pub fn suite() -> Suite {
    Suite::new(EnvironmentManager::new(config())).ignore("requires control-plane and Envoy binaries")
}

/// Admin API access for one shared environment.
#[derive(Debug, Clone)]
pub struct TestHarness {
    client: reqwest::Client,
    admin_port: u16,
    admin_url: String,
}

impl TestHarness {
    /// Harness for the proxy of `env`.
    pub fn new(env: &SharedEnvironment) -> Self {
        Self::for_admin_port(env.config().ports.admin)
    }

    /// Harness for an admin listener on `127.0.0.1:admin_port`.
    pub fn for_admin_port(admin_port: u16) -> Self {
        Self {
            client: reqwest::Client::new(),
            admin_port,
            admin_url: format!("http://127.0.0.1:{admin_port}"),
        }
    }

    /// Wait for Envoy's `/ready` endpoint to report success.
    pub async fn wait_for_envoy(&self, timeout: Duration) -> std::result::Result<(), String> {
        let deadline = Deadline::after(timeout);
        wait_for_port(self.admin_port, deadline.remaining())
            .await
            .map_err(|e| e.to_string())?;

        let mut pause = INITIAL_POLL;
        loop {
            let request = self
                .client
                .get(format!("{}/ready", self.admin_url))
                .timeout(deadline.remaining().max(INITIAL_POLL))
                .send();
            match request.await {
                Ok(resp) if resp.status().is_success() => {
                    info!(elapsed = ?deadline.elapsed(), "Envoy is ready");
                    return Ok(());
                }
                Ok(resp) => warn!(status = %resp.status(), "Envoy not ready"),
                Err(e) => warn!(error = %e, "cannot reach Envoy admin"),
            }

            if deadline.is_expired() {
                return Err(format!("Envoy did not become ready within {timeout:?}"));
            }
            tokio::time::sleep(deadline.clamp(pause)).await;
            pause = (pause * 2).min(MAX_POLL);
        }
    }

    async fn admin_json(&self, path: &str) -> std::result::Result<serde_json::Value, reqwest::Error> {
        self.client
            .get(format!("{}{}", self.admin_url, path))
            .send()
            .await?
            .json()
            .await
    }

    /// Envoy cluster status via the admin API.
    pub async fn get_envoy_clusters(&self) -> std::result::Result<serde_json::Value, reqwest::Error> {
        self.admin_json("/clusters?format=json").await
    }

    /// Envoy listeners via the admin API.
    pub async fn get_envoy_listeners(&self) -> std::result::Result<serde_json::Value, reqwest::Error> {
        self.admin_json("/listeners?format=json").await
    }

    /// Envoy config dump via the admin API.
    pub async fn get_envoy_config_dump(&self) -> std::result::Result<serde_json::Value, reqwest::Error> {
        self.admin_json("/config_dump").await
    }

    /// Names of dynamic clusters, excluding the static discovery cluster.
    pub async fn dynamic_cluster_names(&self) -> Vec<String> {
        let Ok(clusters) = self.get_envoy_clusters().await else {
            return Vec::new();
        };
        clusters
            .get("cluster_statuses")
            .and_then(|c| c.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|c| c.get("name").and_then(|n| n.as_str()))
                    .filter(|n| *n != "xds-grpc")
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Wait until Envoy reports every cluster the registry should produce.
    ///
    /// Returns the clusters still missing at the deadline.
    pub async fn wait_for_clusters(
        &self,
        expected: &[String],
        timeout: Duration,
    ) -> std::result::Result<(), Vec<String>> {
        let deadline = Deadline::after(timeout);
        let mut missing = expected.to_vec();
        let mut pause = INITIAL_POLL;

        loop {
            let present = tokio::time::timeout(
                deadline.remaining().max(INITIAL_POLL),
                self.dynamic_cluster_names(),
            )
            .await
            .unwrap_or_default();
            missing.retain(|name| !present.contains(name));
            if missing.is_empty() {
                info!(count = expected.len(), elapsed = ?deadline.elapsed(), "all expected clusters present");
                return Ok(());
            }

            if deadline.is_expired() {
                return Err(missing);
            }
            tokio::time::sleep(deadline.clamp(pause)).await;
            pause = (pause * 2).min(MAX_POLL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn silent_admin_cannot_hold_ready_wait_past_timeout() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let held = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                open.push(sock);
            }
        });

        let timeout = Duration::from_millis(300);
        let start = Instant::now();
        let err = TestHarness::for_admin_port(port)
            .wait_for_envoy(timeout)
            .await
            .unwrap_err();

        assert!(err.contains("did not become ready"), "{err}");
        assert!(start.elapsed() < Duration::from_millis(900), "took {:?}", start.elapsed());
        held.abort();
    }

    #[tokio::test]
    async fn missing_clusters_are_returned_at_timeout() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let expected = vec!["outbound|80||hello.default.svc.cluster.local".to_string()];

        let start = Instant::now();
        let missing = TestHarness::for_admin_port(port)
            .wait_for_clusters(&expected, Duration::from_millis(300))
            .await
            .unwrap_err();

        assert_eq!(missing, expected);
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(start.elapsed() < Duration::from_millis(900), "took {:?}", start.elapsed());
    }
}
