//! Shared environment lifecycle.
//!
//! [`EnvironmentManager::get`] builds the environment at most once no matter
//! how many callers race for it. The fast path is a lock-free read of the
//! latched handle; only callers that find nothing latched take the
//! construction gate, and they re-check under it before building.
//!
//! ```text
//! Uninitialized -> Starting -> Ready -> TearingDown -> Stopped
//!                     |
//!                     +-- failure --> Uninitialized (retry allowed)
//! ```
//!
//! The proxy has its own gate and state machine on [`SharedEnvironment`]:
//! `NotStarted -> Starting -> Running`, falling back to `NotStarted` on
//! failure. Callers that only read the registry never touch it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use mesh_core::{HarnessError, ProxyIdentity, Result};
use mesh_poller::{
    wait_for_port, Convergence, ConvergencePoller, Deadline, Expectation, HttpStatSource,
    PollerConfig,
};
use mesh_registry::Registry;
use metrics::counter;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::bootstrap::BootstrapParams;
use crate::config::EnvironmentConfig;
use crate::fixtures::seed_fixture;
use crate::launcher::{ComponentHandle, ControlPlaneLauncher, ProcessLauncher, ProxyLauncher};

/// Lifecycle of the shared environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EnvState {
    /// Nothing built yet, or the last attempt failed.
    Uninitialized = 0,
    /// A caller holds the gate and is building.
    Starting = 1,
    /// Built and latched.
    Ready = 2,
    /// Components are being stopped.
    TearingDown = 3,
    /// Torn down; no further use.
    Stopped = 4,
}

impl EnvState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Starting,
            2 => Self::Ready,
            3 => Self::TearingDown,
            4 => Self::Stopped,
            _ => Self::Uninitialized,
        }
    }
}

/// Lifecycle of the proxy inside a ready environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProxyState {
    /// Not started, or the last attempt failed.
    NotStarted = 0,
    /// A caller holds the proxy gate and is starting it.
    Starting = 1,
    /// Running.
    Running = 2,
}

impl ProxyState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Starting,
            2 => Self::Running,
            _ => Self::NotStarted,
        }
    }
}

type Seeder = Arc<dyn Fn(&mut Registry) -> Result<()> + Send + Sync>;

/// The shared environment: a seeded registry, a running control plane and,
/// on demand, a proxy.
///
/// Only read accessors are exposed; the registry is frozen once the
/// environment is latched.
pub struct SharedEnvironment {
    registry: Arc<Registry>,
    config: EnvironmentConfig,
    identity: ProxyIdentity,
    bootstrap: BootstrapParams,
    control_plane: Mutex<Option<Box<dyn ComponentHandle>>>,
    proxy_launcher: Arc<dyn ProxyLauncher>,
    proxy: Mutex<Option<Box<dyn ComponentHandle>>>,
    proxy_state: AtomicU8,
    stopped: AtomicBool,
}

impl fmt::Debug for SharedEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEnvironment")
            .field("registry", &self.registry.stats())
            .field("identity", &self.identity.as_str())
            .field("proxy_state", &self.proxy_state())
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SharedEnvironment {
    /// The seeded registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// A shared handle to the seeded registry.
    #[must_use]
    pub fn registry_arc(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// The configuration the environment was built with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// The identity the proxy runs as.
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &ProxyIdentity {
        &self.identity
    }

    /// The proxy bootstrap parameters.
    #[inline]
    #[must_use]
    pub fn bootstrap(&self) -> &BootstrapParams {
        &self.bootstrap
    }

    /// Current proxy state.
    #[must_use]
    pub fn proxy_state(&self) -> ProxyState {
        ProxyState::from_u8(self.proxy_state.load(Ordering::SeqCst))
    }

    fn set_proxy_state(&self, state: ProxyState) {
        self.proxy_state.store(state as u8, Ordering::SeqCst);
    }

    /// Start the proxy if it is not running yet.
    ///
    /// Concurrent callers share one startup. A failure leaves the proxy
    /// `NotStarted` so a later call can retry; the rest of the environment is
    /// unaffected.
    ///
    /// # Errors
    ///
    /// - [`HarnessError::NotReady`] if the environment was torn down
    /// - Whatever the proxy launcher returns on failure
    pub async fn ensure_proxy(&self) -> Result<()> {
        if self.proxy_state() == ProxyState::Running {
            return Ok(());
        }

        let mut slot = self.proxy.lock().await;
        if self.stopped.load(Ordering::SeqCst) {
            return Err(HarnessError::NotReady {
                what: "proxy: environment has been torn down".into(),
            });
        }
        if slot.is_some() {
            return Ok(());
        }

        self.set_proxy_state(ProxyState::Starting);
        info!(
            node = %self.identity,
            node_hash = %self.identity.node_hash(),
            admin_port = self.config.ports.admin,
            "starting proxy"
        );
        match self.proxy_launcher.launch(&self.bootstrap, &self.config).await {
            Ok(handle) => {
                *slot = Some(handle);
                self.set_proxy_state(ProxyState::Running);
                counter!("harness_proxy_startups_total", "outcome" => "ok").increment(1);
                Ok(())
            }
            Err(e) => {
                self.set_proxy_state(ProxyState::NotStarted);
                counter!("harness_proxy_startups_total", "outcome" => "failed").increment(1);
                error!(
                    node = %self.identity,
                    node_hash = %self.identity.node_hash(),
                    error = %e,
                    "proxy startup failed"
                );
                Err(e)
            }
        }
    }

    /// URL of the proxy's stats document.
    #[must_use]
    pub fn stats_url(&self) -> String {
        self.config.stats_url()
    }

    /// A stat source for the running proxy.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::NotReady`] unless the proxy is running.
    pub fn stat_source(&self, request_timeout: Duration) -> Result<HttpStatSource> {
        if self.proxy_state() != ProxyState::Running {
            return Err(HarnessError::NotReady {
                what: "proxy stats: proxy is not running".into(),
            });
        }
        HttpStatSource::new(self.stats_url(), request_timeout)
    }

    /// Wait for the proxy's admin and traffic listeners, then poll its stats
    /// until `expectations` hold. All three waits share `deadline`.
    ///
    /// The traffic listener only opens once the proxy has applied listener
    /// configuration, so a proxy that is up but has received nothing fails
    /// with [`HarnessError::PortNotReady`] naming that port rather than with
    /// a convergence timeout.
    ///
    /// # Errors
    ///
    /// - [`HarnessError::NotReady`] unless the proxy is running
    /// - [`HarnessError::PortNotReady`] if either listener never accepts
    /// - Any error from [`ConvergencePoller::verify`]
    pub async fn verify(
        &self,
        expectations: &[Expectation],
        deadline: Duration,
    ) -> Result<Convergence> {
        let poller = ConvergencePoller::new(PollerConfig::default());
        let source = self.stat_source(poller.config().request_timeout)?;

        let deadline = Deadline::after(deadline);
        wait_for_port(self.config.ports.admin, deadline.remaining()).await?;
        wait_for_port(self.config.ports.proxy_listener, deadline.remaining()).await?;
        poller.verify(&source, expectations, deadline.remaining()).await
    }

    /// Stop the proxy, then the control plane. Safe to call repeatedly and
    /// when the proxy never started.
    async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let proxy = self.proxy.lock().await.take();
        self.set_proxy_state(ProxyState::NotStarted);
        let control_plane = self.control_plane.lock().await.take();

        for handle in [proxy, control_plane].into_iter().flatten() {
            if let Err(e) = handle.shutdown().await {
                warn!(component = handle.component(), error = %e, "shutdown failed");
            }
        }
    }
}

/// Owns creation and teardown of the [`SharedEnvironment`].
///
/// # Example
///
/// ```rust,no_run
/// use mesh_env::{EnvironmentConfig, EnvironmentManager};
///
/// # async fn run() -> mesh_core::Result<()> {
/// let manager = EnvironmentManager::new(EnvironmentConfig::from_env());
/// let env = manager.get().await?;
/// assert!(env.registry().contains("service3.default.svc.cluster.local"));
/// manager.teardown().await;
/// # Ok(())
/// # }
/// ```
pub struct EnvironmentManager {
    config: EnvironmentConfig,
    control_plane: Arc<dyn ControlPlaneLauncher>,
    proxy: Arc<dyn ProxyLauncher>,
    seed: Seeder,
    ready: OnceLock<Arc<SharedEnvironment>>,
    gate: Mutex<()>,
    state: AtomicU8,
}

impl fmt::Debug for EnvironmentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentManager")
            .field("state", &self.state())
            .field("ports", &self.config.ports)
            .finish_non_exhaustive()
    }
}

impl EnvironmentManager {
    /// A manager that launches both components as child processes and seeds
    /// the standard fixture.
    pub fn new(config: EnvironmentConfig) -> Self {
        Self::with_launchers(config, Arc::new(ProcessLauncher), Arc::new(ProcessLauncher))
    }

    /// A manager with custom launchers.
    pub fn with_launchers(
        config: EnvironmentConfig,
        control_plane: Arc<dyn ControlPlaneLauncher>,
        proxy: Arc<dyn ProxyLauncher>,
    ) -> Self {
        Self {
            config,
            control_plane,
            proxy,
            seed: Arc::new(seed_fixture),
            ready: OnceLock::new(),
            gate: Mutex::new(()),
            state: AtomicU8::new(EnvState::Uninitialized as u8),
        }
    }

    /// Replace the registry seeding step.
    #[must_use]
    pub fn with_seed<F>(mut self, seed: F) -> Self
    where
        F: Fn(&mut Registry) -> Result<()> + Send + Sync + 'static,
    {
        self.seed = Arc::new(seed);
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EnvState {
        EnvState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: EnvState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// The proxy state, or `NotStarted` if the environment is not ready.
    #[must_use]
    pub fn proxy_state(&self) -> ProxyState {
        self.ready
            .get()
            .map_or(ProxyState::NotStarted, |env| env.proxy_state())
    }

    /// The environment if it is already latched. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::NotReady`] before the environment is ready or
    /// after teardown.
    pub fn current(&self) -> Result<Arc<SharedEnvironment>> {
        match (self.state(), self.ready.get()) {
            (EnvState::Ready, Some(env)) => Ok(Arc::clone(env)),
            (state, _) => Err(HarnessError::NotReady {
                what: format!("shared environment is {state:?}"),
            }),
        }
    }

    /// Get the shared environment, building it on first use.
    ///
    /// # Errors
    ///
    /// - [`HarnessError::EnvironmentStartupFailure`] if seeding or the
    ///   control plane fails. Nothing is latched and the next call retries.
    /// - [`HarnessError::NotReady`] after teardown
    pub async fn get(&self) -> Result<Arc<SharedEnvironment>> {
        if let Ok(env) = self.current() {
            return Ok(env);
        }

        let _gate = self.gate.lock().await;
        match self.state() {
            EnvState::Ready => return self.current(),
            EnvState::TearingDown | EnvState::Stopped => {
                return Err(HarnessError::NotReady {
                    what: "shared environment has been torn down".into(),
                })
            }
            EnvState::Uninitialized | EnvState::Starting => {}
        }

        self.set_state(EnvState::Starting);
        info!(
            grpc_port = self.config.ports.grpc,
            http_port = self.config.ports.http,
            "starting shared environment"
        );
        match self.build().await {
            Ok(env) => {
                let env = Arc::new(env);
                if self.ready.set(Arc::clone(&env)).is_err() {
                    // Unreachable while the gate is held and state was not Ready.
                    warn!("environment latched twice");
                }
                self.set_state(EnvState::Ready);
                counter!("harness_environment_startups_total", "outcome" => "ok").increment(1);
                info!(registry = ?env.registry.stats(), node = %env.identity, "shared environment ready");
                Ok(env)
            }
            Err(e) => {
                self.set_state(EnvState::Uninitialized);
                counter!("harness_environment_startups_total", "outcome" => "failed").increment(1);
                error!(error = %e, "shared environment startup failed");
                Err(e)
            }
        }
    }

    /// Get the shared environment with the proxy running.
    ///
    /// # Errors
    ///
    /// See [`EnvironmentManager::get`] and [`SharedEnvironment::ensure_proxy`].
    pub async fn with_proxy(&self) -> Result<Arc<SharedEnvironment>> {
        let env = self.get().await?;
        env.ensure_proxy().await?;
        Ok(env)
    }

    async fn build(&self) -> Result<SharedEnvironment> {
        let mut registry = Registry::new();
        (self.seed)(&mut registry)
            .map_err(|e| HarnessError::startup("registry", "fixture seeding failed", e))?;
        let registry = Arc::new(registry);

        let control_plane = self.control_plane.launch(&registry, &self.config).await?;

        let identity = self.config.proxy_identity();
        let bootstrap = BootstrapParams::for_identity(&identity, self.config.bootstrap_template.clone());
        Ok(SharedEnvironment {
            registry,
            config: self.config.clone(),
            identity,
            bootstrap,
            control_plane: Mutex::new(Some(control_plane)),
            proxy_launcher: Arc::clone(&self.proxy),
            proxy: Mutex::new(None),
            proxy_state: AtomicU8::new(ProxyState::NotStarted as u8),
            stopped: AtomicBool::new(false),
        })
    }

    /// Stop the proxy and control plane, in that order.
    ///
    /// Runs once; later calls return immediately. Safe when nothing or only
    /// part of the environment was started.
    pub async fn teardown(&self) {
        let _gate = self.gate.lock().await;
        if self.state() == EnvState::Stopped {
            return;
        }
        self.set_state(EnvState::TearingDown);
        if let Some(env) = self.ready.get() {
            info!("tearing down shared environment");
            env.shutdown().await;
        }
        self.set_state(EnvState::Stopped);
        info!("shared environment stopped");
    }
}
