//! Discovery resource naming.
//!
//! The control plane derives cluster and listener names from registry
//! entries. The proxy reports per-cluster counters under these names, so the
//! harness needs the same derivation to build expectations such as
//! `cluster.outbound|custom||service3.default.svc.cluster.local.update_success`.

use std::fmt;

/// Traffic direction of a generated cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Towards a remote service.
    Outbound,
    /// Towards the local workload.
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outbound => f.write_str("outbound"),
            Self::Inbound => f.write_str("inbound"),
        }
    }
}

/// Cluster name: `<direction>|<port-name>|<subset>|<hostname>`.
///
/// An empty subset addresses every instance of the service.
///
/// ```rust
/// use mesh_registry::{cluster_name, Direction};
///
/// assert_eq!(
///     cluster_name(Direction::Outbound, "", "custom", "service3.default.svc.cluster.local"),
///     "outbound|custom||service3.default.svc.cluster.local"
/// );
/// ```
#[must_use]
pub fn cluster_name(direction: Direction, subset: &str, port_name: &str, hostname: &str) -> String {
    format!("{direction}|{port_name}|{subset}|{hostname}")
}

/// Listener name for a port number bound on all addresses.
#[must_use]
pub fn listener_name(port: u16) -> String {
    format!("0.0.0.0_{port}")
}

/// Stat prefix under which the proxy reports counters for a cluster.
#[must_use]
pub fn cluster_stat(cluster: &str, counter: &str) -> String {
    format!("cluster.{cluster}.{counter}")
}
