//! # mesh-poller
//!
//! Verifies that a proxy has applied configuration pushed to it, by polling
//! its counters until a set of expectations holds.
//!
//! - [`StatSnapshot`] - Parsed counter document; malformed input reads empty
//! - [`Expectation`] - A counter name plus a [`Predicate`]
//! - [`StatSource`] - Where snapshots come from ([`HttpStatSource`] for a
//!   live admin listener, [`StaticStatSource`] for canned documents)
//! - [`ConvergencePoller`] - Retries with bounded backoff until the deadline
//! - [`wait_for_port`] - Blocks until a local TCP listener accepts
//! - [`Deadline`] - Overflow-safe deadline shared by every wait
//!
//! ## Example
//!
//! ```rust
//! use mesh_poller::{evaluate, standard_xds_expectations, StatSnapshot};
//!
//! let snapshot = StatSnapshot::parse(br#"{"stats":[
//!     {"name":"cluster_manager.cds.update_success","value":1},
//!     {"name":"listener_manager.lds.update_success","value":1}
//! ]}"#);
//! assert!(evaluate(&standard_xds_expectations(), &snapshot).is_empty());
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod deadline;
mod expectation;
mod poller;
mod port;
mod source;
mod stats;

pub use deadline::Deadline;
pub use expectation::{evaluate, standard_xds_expectations, Expectation, Predicate};
pub use poller::{verify, Convergence, ConvergencePoller, PollerConfig};
pub use port::wait_for_port;
pub use source::{HttpStatSource, StatSource, StaticStatSource, STATS_PATH};
pub use stats::{SnapshotStatus, StatSnapshot};
