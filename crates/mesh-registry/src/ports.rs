//! Reusable port-set template.
//!
//! [`port_bundle`] returns the same six named ports at a configurable numeric
//! base. Seeding several services with bundles at the same or different bases
//! checks that the control plane keeps services apart even when their port
//! layouts line up.

use crate::model::{Port, Protocol};

/// Port names in the bundle, in order.
pub const BUNDLE_PORT_NAMES: [&str; 6] = ["http-main", "http-status", "custom", "mongo", "redis", "h2port"];

/// Build the protocol-diverse port bundle offset by `base`.
///
/// | name          | number       | protocol |
/// |---------------|--------------|----------|
/// | `http-main`   | `base + 80`  | HTTP     |
/// | `http-status` | `base + 81`  | HTTP     |
/// | `custom`      | `base + 90`  | TCP      |
/// | `mongo`       | `base + 100` | Mongo    |
/// | `redis`       | `base + 110` | Redis    |
/// | `h2port`      | `base + 66`  | GRPC     |
///
/// `base` is clamped so the highest port stays within `u16`.
#[must_use]
pub fn port_bundle(base: u16) -> Vec<Port> {
    let base = base.min(u16::MAX - 110);
    vec![
        Port::new("http-main", base + 80, Protocol::Http),
        Port::new("http-status", base + 81, Protocol::Http),
        Port::new("custom", base + 90, Protocol::Tcp),
        Port::new("mongo", base + 100, Protocol::Mongo),
        Port::new("redis", base + 110, Protocol::Redis),
        Port::new("h2port", base + 66, Protocol::Grpc),
    ]
}
