//! # mesh-core
//!
//! Core types and error handling for the mesh convergence harness.
//!
//! This crate provides the foundational types used across all other harness crates:
//!
//! - [`HarnessError`] - Error taxonomy covering registry misuse, startup failures,
//!   readiness timeouts and convergence timeouts
//! - [`ProxyIdentity`] - Deterministic proxy node identifiers
//! - [`NodeHash`] - Compact FNV-1a hash of a node identifier
//!
//! ## Example
//!
//! ```rust
//! use mesh_core::{ProxyIdentity, ProxyRole};
//! use std::net::Ipv4Addr;
//!
//! let id = ProxyIdentity::sidecar(Ipv4Addr::new(10, 2, 0, 1).into(), "app3");
//! assert_eq!(
//!     id.as_str(),
//!     "sidecar~10.2.0.1~app3-644fc65469-96dza.testns~testns.svc.cluster.local"
//! );
//! assert_eq!(id.role(), ProxyRole::Sidecar);
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod identity;
mod node;

pub use error::{HarnessError, UnmetExpectation};
pub use identity::{ProxyIdentity, ProxyRole, POD_SUFFIX};
pub use node::NodeHash;

/// Result type alias using [`HarnessError`].
pub type Result<T> = std::result::Result<T, HarnessError>;
