//! Registry data types: ports, services and instances.
//!
//! These are plain values. A [`Service`] and its [`Port`]s are immutable once
//! constructed; the [`Registry`](crate::Registry) hands out shared references
//! only.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Application protocol spoken on a service port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// HTTP/1.1.
    #[serde(rename = "HTTP")]
    Http,
    /// HTTP/2 without gRPC framing.
    #[serde(rename = "HTTP2")]
    Http2,
    /// gRPC over HTTP/2.
    #[serde(rename = "GRPC")]
    Grpc,
    /// TLS-terminated HTTP.
    #[serde(rename = "HTTPS")]
    Https,
    /// Opaque TCP.
    #[serde(rename = "TCP")]
    Tcp,
    /// UDP.
    #[serde(rename = "UDP")]
    Udp,
    /// MongoDB wire protocol.
    Mongo,
    /// Redis protocol.
    Redis,
}

impl Protocol {
    /// Whether the control plane generates HTTP routing for this protocol.
    #[must_use]
    pub fn is_http(&self) -> bool {
        matches!(self, Self::Http | Self::Http2 | Self::Grpc)
    }

    /// Whether the protocol is carried over TCP without HTTP routing.
    #[must_use]
    pub fn is_tcp(&self) -> bool {
        matches!(self, Self::Tcp | Self::Https | Self::Mongo | Self::Redis)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Http => "HTTP",
            Self::Http2 => "HTTP2",
            Self::Grpc => "GRPC",
            Self::Https => "HTTPS",
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Mongo => "Mongo",
            Self::Redis => "Redis",
        };
        f.write_str(s)
    }
}

/// Authentication policy applied to traffic on a port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthPolicy {
    /// Inherit the mesh-wide policy.
    #[default]
    Inherit,
    /// Plaintext.
    None,
    /// Mutual TLS.
    MutualTls,
}

/// A named service port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    name: String,
    number: u16,
    protocol: Protocol,
    #[serde(default)]
    auth_policy: AuthPolicy,
}

impl Port {
    /// Create a port with the inherited auth policy.
    #[must_use]
    pub fn new(name: impl Into<String>, number: u16, protocol: Protocol) -> Self {
        Self {
            name: name.into(),
            number,
            protocol,
            auth_policy: AuthPolicy::Inherit,
        }
    }

    /// Set the auth policy.
    #[must_use]
    pub fn with_auth_policy(mut self, auth_policy: AuthPolicy) -> Self {
        self.auth_policy = auth_policy;
        self
    }

    /// The port name, unique within its service.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The port number.
    #[inline]
    #[must_use]
    pub fn number(&self) -> u16 {
        self.number
    }

    /// The protocol.
    #[inline]
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// The auth policy.
    #[inline]
    #[must_use]
    pub fn auth_policy(&self) -> AuthPolicy {
        self.auth_policy
    }
}

/// A registry service, keyed by its fully-qualified hostname.
///
/// Port order is insertion order. Two differently-named ports may share a
/// number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    hostname: String,
    address: IpAddr,
    ports: Vec<Port>,
}

impl Service {
    pub(crate) fn new(hostname: String, address: IpAddr, ports: Vec<Port>) -> Self {
        Self {
            hostname,
            address,
            ports,
        }
    }

    /// The fully-qualified hostname.
    #[inline]
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The service (virtual) address.
    #[inline]
    #[must_use]
    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// The ports in insertion order.
    #[inline]
    #[must_use]
    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    /// Find a port by name.
    #[must_use]
    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name == name)
    }

    /// Find every port with the given number.
    pub fn ports_numbered(&self, number: u16) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(move |p| p.number == number)
    }
}

/// A concrete workload endpoint backing a [`Service`].
///
/// Built with [`ServiceInstance::builder`]; the service port is named here and
/// resolved against the parent service when the instance is added to the
/// registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    address: IpAddr,
    port: u16,
    service_port: Port,
    labels: BTreeMap<String, String>,
    zone: String,
}

impl ServiceInstance {
    /// Start building an instance at `address:port` serving `service_port`.
    #[must_use]
    pub fn builder(
        address: IpAddr,
        port: u16,
        service_port: impl Into<String>,
    ) -> ServiceInstanceBuilder {
        ServiceInstanceBuilder {
            address,
            port,
            service_port: service_port.into(),
            labels: BTreeMap::new(),
            zone: String::new(),
        }
    }

    /// The endpoint address.
    #[inline]
    #[must_use]
    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// The endpoint port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The parent service's port this endpoint serves.
    #[inline]
    #[must_use]
    pub fn service_port(&self) -> &Port {
        &self.service_port
    }

    /// All labels.
    #[inline]
    #[must_use]
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// A single label value.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// The `version` label, used for subset routing.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.label("version")
    }

    /// The availability zone.
    #[inline]
    #[must_use]
    pub fn zone(&self) -> &str {
        &self.zone
    }
}

/// Builder for [`ServiceInstance`].
#[derive(Debug, Clone)]
pub struct ServiceInstanceBuilder {
    address: IpAddr,
    port: u16,
    service_port: String,
    labels: BTreeMap<String, String>,
    zone: String,
}

impl ServiceInstanceBuilder {
    /// Add a label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set the availability zone.
    #[must_use]
    pub fn zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = zone.into();
        self
    }

    /// The service port name this instance will be bound to.
    #[must_use]
    pub fn service_port_name(&self) -> &str {
        &self.service_port
    }

    pub(crate) fn resolve(self, service_port: Port) -> ServiceInstance {
        ServiceInstance {
            address: self.address,
            port: self.port,
            service_port,
            labels: self.labels,
            zone: self.zone,
        }
    }
}
