//! Environment configuration.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use mesh_core::{HarnessError, ProxyIdentity, Result};

use crate::bootstrap::BootstrapParams;

/// Overrides the control-plane executable.
pub const ENV_CONTROL_PLANE_BIN: &str = "MESH_HARNESS_CONTROL_PLANE_BIN";
/// Overrides the proxy executable.
pub const ENV_PROXY_BIN: &str = "MESH_HARNESS_PROXY_BIN";
/// Overrides the bootstrap template path.
pub const ENV_BOOTSTRAP_TEMPLATE: &str = "MESH_HARNESS_BOOTSTRAP_TEMPLATE";

/// Fixed local ports used by the shared environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortLayout {
    /// Control-plane discovery (gRPC) port.
    pub grpc: u16,
    /// Control-plane HTTP port.
    pub http: u16,
    /// Proxy admin port; serves the stats document.
    pub admin: u16,
    /// Proxy inbound listener port.
    pub proxy_listener: u16,
}

impl Default for PortLayout {
    fn default() -> Self {
        Self {
            grpc: 15010,
            http: 15007,
            admin: 15000,
            proxy_listener: 15001,
        }
    }
}

/// A program plus its argument template.
///
/// Arguments may contain `{registry}`, `{grpc_port}` and `{http_port}`, which
/// are substituted at launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Executable path or name.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
}

impl Command {
    /// A command with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Configuration for the shared environment.
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// Fixed ports.
    pub ports: PortLayout,
    /// How to start the control plane.
    pub control_plane: Command,
    /// How to start the proxy. Bootstrap arguments are appended.
    pub proxy: Command,
    /// Bootstrap template for the proxy.
    pub bootstrap_template: PathBuf,
    /// Proxy IP, used in the proxy identity.
    pub proxy_ip: IpAddr,
    /// Proxy deployment name, used in the proxy identity.
    pub proxy_deployment: String,
    /// Upper bound on each component's startup.
    pub startup_timeout: Duration,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            ports: PortLayout::default(),
            control_plane: Command::new("pilot-discovery")
                .arg("discovery")
                .arg("--registry-file")
                .arg("{registry}")
                .arg("--grpcAddr")
                .arg(":{grpc_port}")
                .arg("--httpAddr")
                .arg(":{http_port}"),
            proxy: Command::new("envoy"),
            bootstrap_template: PathBuf::from("testdata/envoy_bootstrap.json"),
            proxy_ip: IpAddr::V4(Ipv4Addr::new(10, 10, 0, 1)),
            proxy_deployment: "app3".to_string(),
            startup_timeout: Duration::from_secs(30),
        }
    }
}

impl EnvironmentConfig {
    /// Start building a configuration from defaults.
    pub fn builder() -> EnvironmentConfigBuilder {
        EnvironmentConfigBuilder::default()
    }

    /// Defaults overlaid with `MESH_HARNESS_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(bin) = lookup(ENV_CONTROL_PLANE_BIN) {
            self.control_plane.program = PathBuf::from(bin);
        }
        if let Some(bin) = lookup(ENV_PROXY_BIN) {
            self.proxy.program = PathBuf::from(bin);
        }
        if let Some(path) = lookup(ENV_BOOTSTRAP_TEMPLATE) {
            self.bootstrap_template = PathBuf::from(path);
        }
        self
    }

    /// The sidecar identity the proxy runs as.
    #[must_use]
    pub fn proxy_identity(&self) -> ProxyIdentity {
        ProxyIdentity::sidecar(self.proxy_ip, self.proxy_deployment.clone())
    }

    /// Bootstrap parameters for the proxy.
    #[must_use]
    pub fn bootstrap(&self) -> BootstrapParams {
        BootstrapParams::for_identity(&self.proxy_identity(), self.bootstrap_template.clone())
    }

    /// Stats URL on the proxy admin listener.
    #[must_use]
    pub fn stats_url(&self) -> String {
        format!("http://127.0.0.1:{}/stats?format=json", self.ports.admin)
    }

    fn validate(&self) -> Result<()> {
        let PortLayout {
            grpc,
            http,
            admin,
            proxy_listener,
        } = self.ports;
        let all = [grpc, http, admin, proxy_listener];
        if all.contains(&0) {
            return Err(HarnessError::Configuration("ports must be non-zero".into()));
        }
        for (i, a) in all.iter().enumerate() {
            if all[i + 1..].contains(a) {
                return Err(HarnessError::Configuration(format!("port {a} assigned twice")));
            }
        }
        if self.startup_timeout.is_zero() {
            return Err(HarnessError::Configuration("startup timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// Builder for [`EnvironmentConfig`].
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use mesh_env::{EnvironmentConfig, PortLayout};
///
/// let config = EnvironmentConfig::builder()
///     .ports(PortLayout { grpc: 18010, http: 18007, admin: 18000, proxy_listener: 18001 })
///     .startup_timeout(Duration::from_secs(10))
///     .build()
///     .unwrap();
/// assert_eq!(config.stats_url(), "http://127.0.0.1:18000/stats?format=json");
/// ```
#[derive(Debug, Default)]
pub struct EnvironmentConfigBuilder {
    ports: Option<PortLayout>,
    control_plane: Option<Command>,
    proxy: Option<Command>,
    bootstrap_template: Option<PathBuf>,
    proxy_ip: Option<IpAddr>,
    proxy_deployment: Option<String>,
    startup_timeout: Option<Duration>,
}

impl EnvironmentConfigBuilder {
    /// Set the port layout.
    pub fn ports(mut self, ports: PortLayout) -> Self {
        self.ports = Some(ports);
        self
    }

    /// Set the control-plane command.
    pub fn control_plane(mut self, command: Command) -> Self {
        self.control_plane = Some(command);
        self
    }

    /// Set the proxy command.
    pub fn proxy(mut self, command: Command) -> Self {
        self.proxy = Some(command);
        self
    }

    /// Set the bootstrap template path.
    pub fn bootstrap_template(mut self, path: impl Into<PathBuf>) -> Self {
        self.bootstrap_template = Some(path.into());
        self
    }

    /// Set the proxy IP.
    pub fn proxy_ip(mut self, ip: IpAddr) -> Self {
        self.proxy_ip = Some(ip);
        self
    }

    /// Set the proxy deployment name.
    pub fn proxy_deployment(mut self, deployment: impl Into<String>) -> Self {
        self.proxy_deployment = Some(deployment.into());
        self
    }

    /// Set the per-component startup timeout.
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Configuration`] if:
    /// - A port is zero or used twice
    /// - The startup timeout is zero
    pub fn build(self) -> Result<EnvironmentConfig> {
        let defaults = EnvironmentConfig::default();
        let config = EnvironmentConfig {
            ports: self.ports.unwrap_or(defaults.ports),
            control_plane: self.control_plane.unwrap_or(defaults.control_plane),
            proxy: self.proxy.unwrap_or(defaults.proxy),
            bootstrap_template: self.bootstrap_template.unwrap_or(defaults.bootstrap_template),
            proxy_ip: self.proxy_ip.unwrap_or(defaults.proxy_ip),
            proxy_deployment: self.proxy_deployment.unwrap_or(defaults.proxy_deployment),
            startup_timeout: self.startup_timeout.unwrap_or(defaults.startup_timeout),
        };
        config.validate()?;
        Ok(config)
    }
}
