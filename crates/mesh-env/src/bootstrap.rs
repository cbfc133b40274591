//! Proxy bootstrap parameters and template rendering.

use std::path::{Path, PathBuf};

use mesh_core::{HarnessError, NodeHash, ProxyIdentity, Result};

use crate::config::PortLayout;

/// Default `--service-cluster` value.
pub const DEFAULT_SERVICE_CLUSTER: &str = "serviceCluster";

/// How the proxy obtains its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigMode {
    /// All dynamic configuration comes over the discovery protocol.
    #[default]
    DiscoveryOnly,
}

impl ConfigMode {
    /// The proxy command-line flag for this mode.
    #[must_use]
    pub fn as_flag(&self) -> &'static str {
        match self {
            Self::DiscoveryOnly => "--v2-config-only",
        }
    }
}

/// Parameters that bind a proxy to its identity and bootstrap file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapParams {
    /// Value of `--service-cluster`.
    pub service_cluster: String,
    /// Value of `--service-node`; the encoded proxy identity.
    pub service_node: String,
    /// Configuration source mode.
    pub config_mode: ConfigMode,
    /// Bootstrap template on disk.
    pub template_path: PathBuf,
}

impl BootstrapParams {
    /// Parameters for `identity` using the default service cluster.
    pub fn for_identity(identity: &ProxyIdentity, template_path: impl Into<PathBuf>) -> Self {
        Self {
            service_cluster: DEFAULT_SERVICE_CLUSTER.to_string(),
            service_node: identity.to_string(),
            config_mode: ConfigMode::default(),
            template_path: template_path.into(),
        }
    }

    /// Short hash of the node id, used to tag the proxy's logs and files.
    #[must_use]
    pub fn node_hash(&self) -> NodeHash {
        NodeHash::from_id(&self.service_node)
    }

    /// Proxy arguments for an already rendered bootstrap file.
    #[must_use]
    pub fn to_proxy_args(&self, rendered: &Path) -> Vec<String> {
        vec![
            "-c".to_string(),
            rendered.display().to_string(),
            "--service-cluster".to_string(),
            self.service_cluster.clone(),
            "--service-node".to_string(),
            self.service_node.clone(),
            self.config_mode.as_flag().to_string(),
        ]
    }

    /// Read the template and substitute node and port placeholders.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::EnvironmentStartupFailure`] if the template
    /// cannot be read.
    pub fn render(&self, ports: &PortLayout) -> Result<String> {
        let template = std::fs::read_to_string(&self.template_path).map_err(|e| {
            HarnessError::startup(
                "proxy",
                format!("cannot read bootstrap template {}", self.template_path.display()),
                e,
            )
        })?;
        Ok(render_template(&template, &self.service_node, ports))
    }

    /// Render into `dir/envoy.json` and return the written path.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::EnvironmentStartupFailure`] on any I/O failure.
    pub fn write_rendered(&self, ports: &PortLayout, dir: &Path) -> Result<PathBuf> {
        let rendered = self.render(ports)?;
        let path = dir.join("envoy.json");
        std::fs::write(&path, rendered).map_err(|e| {
            HarnessError::startup("proxy", format!("cannot write {}", path.display()), e)
        })?;
        Ok(path)
    }
}

/// Substitute `{{NodeID}}`, `{{AdminPort}}`, `{{GrpcPort}}` and
/// `{{ListenerPort}}` in a bootstrap template.
#[must_use]
pub fn render_template(template: &str, node_id: &str, ports: &PortLayout) -> String {
    template
        .replace("{{NodeID}}", node_id)
        .replace("{{AdminPort}}", &ports.admin.to_string())
        .replace("{{GrpcPort}}", &ports.grpc.to_string())
        .replace("{{ListenerPort}}", &ports.proxy_listener.to_string())
}
