//! # mesh-harness
//!
//! Proves that proxies actually applied the configuration an xDS control
//! plane pushed to them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use mesh_harness::prelude::*;
//!
//! # async fn run() -> Result<()> {
//! let manager = EnvironmentManager::new(EnvironmentConfig::from_env());
//!
//! // Registry-only tests never start the proxy.
//! let env = manager.get().await?;
//! assert_eq!(env.registry().instances("service3.default.svc.cluster.local").len(), 2);
//!
//! // Proxy tests wait for the push to land.
//! let env = manager.with_proxy().await?;
//! env.verify(&standard_xds_expectations(), Duration::from_secs(30)).await?;
//!
//! manager.teardown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - `mesh-core` - Errors, proxy identities, node hashes
//! - `mesh-registry` - Services, ports, instances and derived discovery names
//! - `mesh-env` - Shared environment lifecycle, component launchers and the
//!   suite runner that tears the environment down once per process
//! - `mesh-poller` - Stat snapshots, expectations and the convergence poller
//!
//! This crate (`mesh-harness`) re-exports all public APIs for convenience.
//!
//! ## Design Principles
//!
//! 1. **No panics in library code** - All errors are returned as `Result`
//! 2. **Every wait has a deadline** - Port readiness and convergence alike
//! 3. **Build once** - The shared environment is constructed exactly once
//! 4. **Diagnosable failures** - Timeouts list every unmet counter

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use mesh_core as core;
pub use mesh_env as env;
pub use mesh_poller as poller;
pub use mesh_registry as registry;

/// Prelude module for convenient imports.
///
/// ```rust
/// use mesh_harness::prelude::*;
/// ```
pub mod prelude {
    pub use mesh_core::{HarnessError, NodeHash, ProxyIdentity, ProxyRole, Result, UnmetExpectation};

    pub use mesh_registry::{
        cluster_name, cluster_stat, listener_name, port_bundle, AuthPolicy, Direction, Port,
        Protocol, Registry, Service, ServiceInstance,
    };

    pub use mesh_env::{
        BootstrapParams, ConfigMode, EnvState, EnvironmentConfig, EnvironmentManager, Outcome,
        PortLayout, ProxyState, SharedEnvironment, Suite, SuiteArgs, SuiteReport,
    };

    pub use mesh_poller::{
        standard_xds_expectations, verify, wait_for_port, Convergence, ConvergencePoller, Deadline,
        Expectation, HttpStatSource, PollerConfig, Predicate, StatSnapshot, StatSource,
        StaticStatSource,
    };
}

/// Version information for this crate.
pub mod version {
    /// Crate version.
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Minimum supported Rust version.
    pub const MSRV: &str = "1.80";

    /// Get version info as a string.
    pub fn version_string() -> String {
        format!("mesh-harness {} (MSRV {})", VERSION, MSRV)
    }
}
