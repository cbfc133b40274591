//! Component launchers.
//!
//! The control plane and the proxy are external programs. The manager only
//! sees them through [`ControlPlaneLauncher`], [`ProxyLauncher`] and the
//! [`ComponentHandle`] each launch returns, so tests can substitute in-memory
//! doubles.

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use mesh_core::{HarnessError, Result};
use mesh_poller::wait_for_port;
use mesh_registry::Registry;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bootstrap::BootstrapParams;
use crate::config::EnvironmentConfig;

const STOP_GRACE: Duration = Duration::from_secs(5);

/// A started component that can be stopped.
#[async_trait]
pub trait ComponentHandle: Send + Sync + fmt::Debug {
    /// Component name for logs and errors.
    fn component(&self) -> &str;

    /// Stop the component. Calling this more than once is a no-op.
    async fn shutdown(&self) -> Result<()>;
}

/// Starts the control plane serving a seeded registry.
#[async_trait]
pub trait ControlPlaneLauncher: Send + Sync {
    /// Start the control plane and wait until it accepts connections.
    async fn launch(
        &self,
        registry: &Registry,
        config: &EnvironmentConfig,
    ) -> Result<Box<dyn ComponentHandle>>;
}

/// Starts the data-plane proxy.
#[async_trait]
pub trait ProxyLauncher: Send + Sync {
    /// Start the proxy and wait until its admin listener accepts connections.
    async fn launch(
        &self,
        bootstrap: &BootstrapParams,
        config: &EnvironmentConfig,
    ) -> Result<Box<dyn ComponentHandle>>;
}

/// Launches both components as child processes from [`EnvironmentConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

#[async_trait]
impl ControlPlaneLauncher for ProcessLauncher {
    async fn launch(
        &self,
        registry: &Registry,
        config: &EnvironmentConfig,
    ) -> Result<Box<dyn ComponentHandle>> {
        const COMPONENT: &str = "control-plane";

        let scratch = scratch_dir(COMPONENT, "control-plane")?;
        let registry_path = scratch.path().join("registry.json");
        let body = serde_json::to_vec_pretty(&registry.export())
            .map_err(|e| HarnessError::startup(COMPONENT, "cannot serialize registry", e))?;
        std::fs::write(&registry_path, body).map_err(|e| {
            HarnessError::startup(COMPONENT, format!("cannot write {}", registry_path.display()), e)
        })?;

        let registry_arg = registry_path.display().to_string();
        let grpc = config.ports.grpc.to_string();
        let http = config.ports.http.to_string();
        let args: Vec<String> = config
            .control_plane
            .args
            .iter()
            .map(|a| {
                a.replace("{registry}", &registry_arg)
                    .replace("{grpc_port}", &grpc)
                    .replace("{http_port}", &http)
            })
            .collect();

        let child = spawn(COMPONENT, &config.control_plane.program, &args)?;
        let handle = ProcessHandle::new(COMPONENT, child, scratch)?;
        handle
            .await_listener(config.ports.grpc, config.startup_timeout)
            .await?;
        info!(pid = handle.pid, grpc_port = config.ports.grpc, "control plane started");
        Ok(Box::new(handle))
    }
}

#[async_trait]
impl ProxyLauncher for ProcessLauncher {
    async fn launch(
        &self,
        bootstrap: &BootstrapParams,
        config: &EnvironmentConfig,
    ) -> Result<Box<dyn ComponentHandle>> {
        const COMPONENT: &str = "proxy";

        let node_hash = bootstrap.node_hash();
        let scratch = scratch_dir(COMPONENT, &format!("proxy-{node_hash}"))?;
        let rendered = bootstrap.write_rendered(&config.ports, scratch.path())?;

        let mut args = config.proxy.args.clone();
        args.extend(bootstrap.to_proxy_args(&rendered));

        let child = spawn(COMPONENT, &config.proxy.program, &args)?;
        let handle = ProcessHandle::new(COMPONENT, child, scratch)?;
        handle
            .await_listener(config.ports.admin, config.startup_timeout)
            .await?;
        info!(
            pid = handle.pid,
            node = %bootstrap.service_node,
            %node_hash,
            admin_port = config.ports.admin,
            "proxy started"
        );
        Ok(Box::new(handle))
    }
}

fn scratch_dir(component: &'static str, tag: &str) -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix(&format!("mesh-harness-{tag}-"))
        .tempdir()
        .map_err(|e| HarnessError::startup(component, "cannot create scratch directory", e))
}

fn spawn(component: &'static str, program: &Path, args: &[String]) -> Result<Child> {
    debug!(component, program = %program.display(), ?args, "spawning");
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            HarnessError::startup(component, format!("cannot spawn {}", program.display()), e)
        })
}

/// A child process plus the scratch directory it reads from.
///
/// The process is killed when the handle is dropped.
#[derive(Debug)]
pub struct ProcessHandle {
    component: &'static str,
    pid: u32,
    child: Mutex<Option<Child>>,
    _scratch: TempDir,
}

impl ProcessHandle {
    fn new(component: &'static str, child: Child, scratch: TempDir) -> Result<Self> {
        let pid = child.id().ok_or_else(|| HarnessError::EnvironmentStartupFailure {
            component: component.to_string(),
            message: "process exited before its pid was read".to_string(),
            source: None,
        })?;
        Ok(Self {
            component,
            pid,
            child: Mutex::new(Some(child)),
            _scratch: scratch,
        })
    }

    /// OS process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait for `port` to accept connections, failing early if the process
    /// exits first. On failure the process is killed.
    async fn await_listener(&self, port: u16, timeout: Duration) -> Result<()> {
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Err(HarnessError::NotReady {
                what: format!("{} process", self.component),
            });
        };

        let outcome = tokio::select! {
            ready = wait_for_port(port, timeout) => ready.map_err(|e| {
                HarnessError::startup(self.component, format!("nothing listening on port {port}"), e)
            }),
            status = child.wait() => Err(match status {
                Ok(status) => HarnessError::EnvironmentStartupFailure {
                    component: self.component.to_string(),
                    message: format!("exited with {status} before listening on port {port}"),
                    source: None,
                },
                Err(e) => HarnessError::startup(self.component, "cannot wait on process", e),
            }),
        };

        if outcome.is_err() {
            if let Some(mut child) = guard.take() {
                let _ = child.start_kill();
                let _ = tokio::time::timeout(STOP_GRACE, child.wait()).await;
            }
        }
        outcome
    }
}

#[async_trait]
impl ComponentHandle for ProcessHandle {
    fn component(&self) -> &str {
        self.component
    }

    async fn shutdown(&self) -> Result<()> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        if let Err(e) = child.start_kill() {
            // Already exited.
            debug!(component = self.component, pid = self.pid, error = %e, "kill failed");
        }
        match tokio::time::timeout(STOP_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                info!(component = self.component, pid = self.pid, %status, "stopped");
            }
            Ok(Err(e)) => {
                warn!(component = self.component, pid = self.pid, error = %e, "wait failed");
            }
            Err(_) => {
                warn!(component = self.component, pid = self.pid, "did not exit within grace period");
            }
        }
        Ok(())
    }
}
