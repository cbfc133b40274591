//! # mesh-registry
//!
//! In-memory service registry used to seed control-plane test fixtures.
//!
//! - [`Registry`] - Hostname-keyed services plus their instances
//! - [`Service`], [`Port`], [`ServiceInstance`] - Immutable registry values
//! - [`port_bundle`] - Reusable six-port template at a configurable base
//! - [`cluster_name`], [`listener_name`] - Names the control plane derives
//!   from registry entries
//!
//! ## Key Design Decisions
//!
//! - The registry is additive-only; there is no removal path
//! - Mutation needs `&mut Registry`, so a registry shared behind `Arc` is
//!   read-only by construction
//! - Port order is insertion order and port numbers may repeat across
//!   differently-named ports

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod discovery;
mod model;
mod ports;
mod registry;

pub use discovery::{cluster_name, cluster_stat, listener_name, Direction};
pub use model::{AuthPolicy, Port, Protocol, Service, ServiceInstance, ServiceInstanceBuilder};
pub use ports::{port_bundle, BUNDLE_PORT_NAMES};
pub use registry::{Registry, RegistryExport, RegistryStats};
