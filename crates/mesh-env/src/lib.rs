//! # mesh-env
//!
//! One shared control-plane environment per test process.
//!
//! - [`EnvironmentManager`] - Builds the [`SharedEnvironment`] exactly once
//!   across concurrent callers and owns its teardown
//! - [`EnvironmentConfig`] - Ports, commands, bootstrap template, timeouts
//! - [`BootstrapParams`] - Identity and flags handed to the proxy
//! - [`ControlPlaneLauncher`], [`ProxyLauncher`] - How components are started
//! - [`seed_fixture`] - The registry every environment is seeded with
//! - [`Suite`] - Runs a test binary's cases against one environment and
//!   tears it down once when the run ends
//!
//! ## Key Design Decisions
//!
//! - A failed startup is never latched; the next caller retries
//! - The proxy is started on demand behind its own gate, so registry-only
//!   callers never wait on it
//! - Teardown is idempotent and runs once at the end of a [`Suite`] run;
//!   child processes are also killed when their handles drop

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bootstrap;
mod config;
pub mod fixtures;
mod launcher;
mod manager;
mod suite;

pub use bootstrap::{render_template, BootstrapParams, ConfigMode, DEFAULT_SERVICE_CLUSTER};
pub use config::{
    Command, EnvironmentConfig, EnvironmentConfigBuilder, PortLayout, ENV_BOOTSTRAP_TEMPLATE,
    ENV_CONTROL_PLANE_BIN, ENV_PROXY_BIN,
};
pub use fixtures::seed_fixture;
pub use launcher::{
    ComponentHandle, ControlPlaneLauncher, ProcessHandle, ProcessLauncher, ProxyLauncher,
};
pub use manager::{EnvState, EnvironmentManager, ProxyState, SharedEnvironment};
pub use suite::{Outcome, Suite, SuiteArgs, SuiteReport};
