//! Shared doubles for the integration tests.
//!
//! [`SimulatedControlPlane`] records the clusters it would push for the
//! seeded registry. [`SimulatedProxy`] serves a stats document on the admin
//! port that reports those clusters as applied, after an optional number of
//! unconverged responses, and opens the traffic listener port unless told not
//! to.

use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mesh_harness::env::{ComponentHandle, ControlPlaneLauncher, ProxyLauncher};
use mesh_harness::prelude::*;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing_subscriber::FmtSubscriber;

/// Initialize tracing for tests.
pub fn init_tracing() {
    let _ = FmtSubscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// A port nothing is listening on.
pub fn free_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// A port layout of currently free ports.
pub fn fresh_ports() -> PortLayout {
    PortLayout {
        grpc: free_port(),
        http: free_port(),
        admin: free_port(),
        proxy_listener: free_port(),
    }
}

/// Environment configuration on fresh ports.
pub fn test_config() -> EnvironmentConfig {
    EnvironmentConfig::builder()
        .ports(fresh_ports())
        .startup_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Stats document reporting CDS/LDS success and one update per cluster.
pub fn converged_document(clusters: &[String]) -> String {
    let mut stats = vec![
        json!({"name": "cluster_manager.cds.update_success", "value": 1}),
        json!({"name": "cluster_manager.cds.update_rejected", "value": 0}),
        json!({"name": "listener_manager.lds.update_success", "value": 1}),
        json!({"name": "listener_manager.lds.update_rejected", "value": 0}),
        json!({"name": "cluster.xds-grpc.update_failure", "value": 0}),
    ];
    stats.extend(
        clusters
            .iter()
            .map(|c| json!({"name": cluster_stat(c, "update_success"), "value": 1})),
    );
    json!({ "stats": stats }).to_string()
}

/// Serves stats documents over HTTP, one per request, repeating the last.
#[derive(Debug)]
pub struct StatsServer {
    requests: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl StatsServer {
    /// Bind `127.0.0.1:port` and serve `documents`.
    pub async fn start(port: u16, documents: Vec<String>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let body = documents
                    .get(n)
                    .or_else(|| documents.last())
                    .cloned()
                    .unwrap_or_default();
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = sock.read(&mut buf).await;
                    let resp = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = sock.write_all(resp.as_bytes()).await;
                    let _ = sock.shutdown().await;
                });
            }
        });
        Ok(Self { requests, task })
    }

    /// Requests served so far, including readiness probes that sent nothing.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Records every component shutdown in order.
pub type ShutdownLog = Arc<Mutex<Vec<String>>>;

#[derive(Debug)]
struct SimulatedHandle {
    name: &'static str,
    log: ShutdownLog,
    server: Mutex<Option<StatsServer>>,
    listener: Mutex<Option<TcpListener>>,
}

#[async_trait]
impl ComponentHandle for SimulatedHandle {
    fn component(&self) -> &str {
        self.name
    }

    async fn shutdown(&self) -> Result<()> {
        self.server.lock().unwrap().take();
        self.listener.lock().unwrap().take();
        self.log.lock().unwrap().push(self.name.to_string());
        Ok(())
    }
}

/// A control plane that "pushes" the outbound clusters of the registry.
#[derive(Debug, Default)]
pub struct SimulatedControlPlane {
    /// Launch attempts.
    pub launches: AtomicUsize,
    /// Fail this many launches before succeeding.
    pub failures: usize,
    /// Time each launch takes.
    pub delay: Duration,
    /// Clusters pushed by the last successful launch.
    pub pushed: Arc<Mutex<Vec<String>>>,
    /// Shared shutdown log.
    pub log: ShutdownLog,
}

#[async_trait]
impl ControlPlaneLauncher for SimulatedControlPlane {
    async fn launch(
        &self,
        registry: &Registry,
        _config: &EnvironmentConfig,
    ) -> Result<Box<dyn ComponentHandle>> {
        let n = self.launches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if n < self.failures {
            return Err(HarnessError::EnvironmentStartupFailure {
                component: "control-plane".into(),
                message: format!("simulated failure {n}"),
                source: None,
            });
        }
        *self.pushed.lock().unwrap() = registry.outbound_cluster_names();
        Ok(Box::new(SimulatedHandle {
            name: "control-plane",
            log: Arc::clone(&self.log),
            server: Mutex::new(None),
            listener: Mutex::new(None),
        }))
    }
}

/// A proxy that reports the pushed clusters after `unconverged` empty reads.
#[derive(Debug, Default)]
pub struct SimulatedProxy {
    /// Launch attempts.
    pub launches: AtomicUsize,
    /// Fail this many launches before succeeding.
    pub failures: usize,
    /// Empty stats documents served before the converged one.
    pub unconverged: usize,
    /// Clusters to report, shared with [`SimulatedControlPlane::pushed`].
    pub pushed: Arc<Mutex<Vec<String>>>,
    /// Shared shutdown log.
    pub log: ShutdownLog,
    /// Node id from the last launch's bootstrap.
    pub node: Mutex<Option<String>>,
    /// Never open the traffic listener, as if no listener config arrived.
    pub without_listener: bool,
}

#[async_trait]
impl ProxyLauncher for SimulatedProxy {
    async fn launch(
        &self,
        bootstrap: &BootstrapParams,
        config: &EnvironmentConfig,
    ) -> Result<Box<dyn ComponentHandle>> {
        let n = self.launches.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(HarnessError::EnvironmentStartupFailure {
                component: "proxy".into(),
                message: format!("simulated failure {n}"),
                source: None,
            });
        }
        *self.node.lock().unwrap() = Some(bootstrap.service_node.clone());

        let clusters = self.pushed.lock().unwrap().clone();
        let mut documents = vec![r#"{"stats":[]}"#.to_string(); self.unconverged];
        documents.push(converged_document(&clusters));
        // One extra leading document absorbs the readiness probe connection.
        documents.insert(0, r#"{"stats":[]}"#.to_string());

        let server = StatsServer::start(config.ports.admin, documents)
            .await
            .map_err(|e| HarnessError::startup("proxy", "cannot bind admin port", e))?;
        let listener = if self.without_listener {
            None
        } else {
            let bound = TcpListener::bind(("127.0.0.1", config.ports.proxy_listener))
                .await
                .map_err(|e| HarnessError::startup("proxy", "cannot bind listener port", e))?;
            Some(bound)
        };
        Ok(Box::new(SimulatedHandle {
            name: "proxy",
            log: Arc::clone(&self.log),
            server: Mutex::new(Some(server)),
            listener: Mutex::new(listener),
        }))
    }
}

/// A control plane and proxy wired to share pushed clusters and a log.
pub fn simulated_pair(unconverged: usize) -> (Arc<SimulatedControlPlane>, Arc<SimulatedProxy>, ShutdownLog) {
    let pushed = Arc::new(Mutex::new(Vec::new()));
    let log: ShutdownLog = Arc::default();
    let cp = Arc::new(SimulatedControlPlane {
        pushed: Arc::clone(&pushed),
        log: Arc::clone(&log),
        ..SimulatedControlPlane::default()
    });
    let proxy = Arc::new(SimulatedProxy {
        unconverged,
        pushed,
        log: Arc::clone(&log),
        ..SimulatedProxy::default()
    });
    (cp, proxy, log)
}
