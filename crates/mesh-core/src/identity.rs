//! Proxy identity encoding.
//!
//! A proxy identity is the node ID a data-plane proxy presents to the control
//! plane. The control plane and the proxy bootstrap must agree on it without a
//! side channel, so encoding is a pure function of its inputs:
//!
//! ```text
//! <role>~<ip>~<deployment>-<pod-suffix>.<namespace>~<namespace>.svc.cluster.local
//! ```

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{HarnessError, NodeHash, Result};

/// Synthetic pod-name fragment appended to every deployment name.
pub const POD_SUFFIX: &str = "644fc65469-96dza";

const DELIMITER: char = '~';
const DOMAIN_SUFFIX: &str = ".svc.cluster.local";

/// The role a proxy plays in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyRole {
    /// Per-workload sidecar proxy.
    Sidecar,
    /// Edge gateway. Encoded as `router` on the wire.
    #[serde(rename = "router")]
    Gateway,
    /// Legacy ingress controller.
    Ingress,
}

impl ProxyRole {
    /// The token used in the identity string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sidecar => "sidecar",
            Self::Gateway => "router",
            Self::Ingress => "ingress",
        }
    }
}

impl fmt::Display for ProxyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sidecar" => Ok(Self::Sidecar),
            "router" => Ok(Self::Gateway),
            "ingress" => Ok(Self::Ingress),
            other => Err(format!("unknown proxy role {other:?}")),
        }
    }
}

/// Encoded proxy node identifier.
///
/// Identical inputs always produce identical identities; inputs differing only
/// in IP produce different identities.
///
/// # Example
///
/// ```rust
/// use mesh_core::{ProxyIdentity, ProxyRole};
///
/// let ip = "10.3.0.1".parse().unwrap();
/// let gw = ProxyIdentity::gateway(ip);
/// assert!(gw.as_str().starts_with("router~10.3.0.1~istio-gateway-"));
///
/// let parsed: ProxyIdentity = gw.as_str().parse().unwrap();
/// assert_eq!(parsed, gw);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyIdentity {
    role: ProxyRole,
    ip: IpAddr,
    deployment: String,
    namespace: String,
    encoded: String,
}

impl ProxyIdentity {
    /// Encode an identity from its components.
    #[must_use]
    pub fn new(
        role: ProxyRole,
        ip: IpAddr,
        deployment: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        let deployment = deployment.into();
        let namespace = namespace.into();
        let encoded = format!(
            "{role}{DELIMITER}{ip}{DELIMITER}{deployment}-{POD_SUFFIX}.{namespace}{DELIMITER}{namespace}{DOMAIN_SUFFIX}"
        );
        Self {
            role,
            ip,
            deployment,
            namespace,
            encoded,
        }
    }

    /// Sidecar for `deployment` in the `testns` namespace.
    #[must_use]
    pub fn sidecar(ip: IpAddr, deployment: impl Into<String>) -> Self {
        Self::new(ProxyRole::Sidecar, ip, deployment, "testns")
    }

    /// The mesh gateway in `istio-system`.
    #[must_use]
    pub fn gateway(ip: IpAddr) -> Self {
        Self::new(ProxyRole::Gateway, ip, "istio-gateway", "istio-system")
    }

    /// The ingress controller in `pilot-noauth-system`.
    #[must_use]
    pub fn ingress(ip: IpAddr) -> Self {
        Self::new(ProxyRole::Ingress, ip, "istio-ingress", "pilot-noauth-system")
    }

    /// Parse an encoded identity.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidIdentity`] if the string does not follow
    /// the identity grammar.
    pub fn parse(identity: &str) -> Result<Self> {
        let invalid = |reason: &str| HarnessError::InvalidIdentity {
            identity: identity.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = identity.split(DELIMITER).collect();
        let [role, ip, pod, domain] = parts.as_slice() else {
            return Err(invalid("expected four '~'-separated fields"));
        };

        let role: ProxyRole = role.parse().map_err(|e: String| invalid(&e))?;
        let ip: IpAddr = ip.parse().map_err(|_| invalid("malformed IP address"))?;

        let (pod_name, namespace) = pod
            .split_once('.')
            .ok_or_else(|| invalid("pod field has no namespace"))?;
        let deployment = pod_name
            .strip_suffix(POD_SUFFIX)
            .and_then(|d| d.strip_suffix('-'))
            .ok_or_else(|| invalid("pod name does not carry the synthetic suffix"))?;

        if domain.strip_suffix(DOMAIN_SUFFIX) != Some(namespace) {
            return Err(invalid("domain does not match the pod namespace"));
        }

        Ok(Self::new(role, ip, deployment, namespace))
    }

    /// The encoded identity string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// The proxy role.
    #[inline]
    #[must_use]
    pub fn role(&self) -> ProxyRole {
        self.role
    }

    /// The proxy IP address.
    #[inline]
    #[must_use]
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// The deployment name, without the pod suffix.
    #[inline]
    #[must_use]
    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    /// The namespace.
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Compact hash of the encoded identity.
    #[must_use]
    pub fn node_hash(&self) -> NodeHash {
        NodeHash::from_id(&self.encoded)
    }
}

impl fmt::Display for ProxyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl FromStr for ProxyIdentity {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for ProxyIdentity {
    fn as_ref(&self) -> &str {
        &self.encoded
    }
}

impl From<ProxyIdentity> for String {
    fn from(id: ProxyIdentity) -> Self {
        id.encoded
    }
}
