//! Envoy integration tests
//!
//! These tests start the control plane and Envoy as child processes and
//! verify that the pushed configuration converges. All cases in the
//! `convergence` test binary share one environment, torn down once at the end of
//! the run.
//!
//! ## Prerequisites
//!
//! 1. A control-plane binary (`MESH_HARNESS_CONTROL_PLANE_BIN`, default
//!    `pilot-discovery`) that accepts `--registry-file`
//! 2. An Envoy binary (`MESH_HARNESS_PROXY_BIN`, default `envoy`)
//! 3. Ports 15000, 15001, 15007 and 15010 must be available
//!
//! ## Running Tests
//!
//! ```bash
//! MESH_HARNESS_PROXY_BIN=/usr/local/bin/envoy \
//!     cargo test --package envoy-tests -- --ignored
//! ```

pub mod harness;
