//! The fixed registry fixture seeded into every shared environment.

use std::net::{IpAddr, Ipv4Addr};

use mesh_core::Result;
use mesh_registry::{port_bundle, Port, Protocol, Registry, ServiceInstance};
use tracing::debug;

/// Bundle service at port base 1000.
pub const HELLO: &str = "hello.default.svc.cluster.local";
/// Two instances split by `version` label.
pub const SERVICE3: &str = "service3.default.svc.cluster.local";
/// Ingress gateway service.
pub const INGRESS: &str = "istio-ingress.istio-system.svc.cluster.local";
/// Single `http-main` port 80, sharing the number with the bundles.
pub const SERVICE4: &str = "service4.default.svc.cluster.local";

const fn ip(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(a, b, c, d))
}

/// Seed the standard fixture.
///
/// # Errors
///
/// Fails if any fixture hostname is already present.
pub fn seed_fixture(registry: &mut Registry) -> Result<()> {
    registry.add_service(HELLO, ip(10, 1, 0, 0), port_bundle(1000))?;

    registry.add_service(SERVICE3, ip(10, 10, 0, 1), port_bundle(0))?;
    registry.add_instance(
        SERVICE3,
        ServiceInstance::builder(ip(10, 2, 0, 1), 2080, "http-main")
            .label("version", "v1")
            .zone("az"),
    )?;
    registry.add_instance(
        SERVICE3,
        ServiceInstance::builder(ip(10, 3, 0, 1), 2080, "http-main")
            .label("version", "v2")
            .label("app", "my-gateway-controller")
            .zone("az"),
    )?;

    registry.add_service(INGRESS, ip(10, 10, 0, 2), port_bundle(0))?;
    registry.add_instance(
        INGRESS,
        ServiceInstance::builder(ip(10, 3, 0, 2), 80, "http-main")
            .label("version", "v1")
            .label("istio", "ingress")
            .zone("az"),
    )?;

    registry.add_service(
        SERVICE4,
        ip(10, 1, 0, 4),
        vec![Port::new("http-main", 80, Protocol::Http)],
    )?;

    debug!(stats = ?registry.stats(), "fixture seeded");
    Ok(())
}
