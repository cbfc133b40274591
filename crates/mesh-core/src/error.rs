//! Error types for harness operations.
//!
//! This module provides [`HarnessError`], the error taxonomy shared by the
//! registry, the environment lifecycle manager and the convergence poller.
//! Every variant names the hostname, port, counter or identity it concerns.

use std::fmt;
use std::time::Duration;

/// Error type for harness operations.
///
/// Variants fall into two classes:
/// - Test-fatal: registry misuse, identity parse failures, readiness and
///   convergence timeouts. Only the current test should fail.
/// - Run-fatal: [`HarnessError::EnvironmentStartupFailure`]. No test can
///   proceed without the shared environment.
///
/// # Example
///
/// ```rust
/// use mesh_core::HarnessError;
///
/// let err = HarnessError::UnknownService {
///     hostname: "svc.example".to_string(),
/// };
/// assert!(err.to_string().contains("svc.example"));
/// assert!(!err.is_fatal_to_run());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// A service with this hostname was already added.
    #[error("duplicate service: {hostname} is already registered")]
    DuplicateService {
        /// The offending hostname.
        hostname: String,
    },

    /// An instance was added for a hostname that has no service.
    #[error("unknown service: cannot add instance for unregistered hostname {hostname}")]
    UnknownService {
        /// The offending hostname.
        hostname: String,
    },

    /// Lookup of a hostname that is not in the registry.
    #[error("service not found: {hostname}")]
    NotFound {
        /// The hostname that was looked up.
        hostname: String,
    },

    /// An instance referenced a port name its service does not declare.
    #[error("unknown port {port_name:?} on service {hostname}")]
    UnknownPort {
        /// The service hostname.
        hostname: String,
        /// The port name that was referenced.
        port_name: String,
    },

    /// A proxy identity string did not match the identity grammar.
    #[error("invalid proxy identity {identity:?}: {reason}")]
    InvalidIdentity {
        /// The identity string.
        identity: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The control plane or the proxy process failed to start.
    #[error("environment startup failed ({component}): {message}")]
    EnvironmentStartupFailure {
        /// Which component failed, e.g. `control-plane` or `proxy`.
        component: String,
        /// Description of the failure.
        message: String,
        /// Optional underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Shared state was accessed before it reached the ready state.
    #[error("not ready: {what}")]
    NotReady {
        /// Which accessor was called.
        what: String,
    },

    /// Nothing accepted connections on the port before the deadline.
    #[error("port {port} not ready: no listener accepted a connection within {waited:?}")]
    PortNotReady {
        /// The TCP port that was probed.
        port: u16,
        /// How long the probe waited.
        waited: Duration,
    },

    /// The stat endpoint could not be read at all.
    #[error("stat fetch failed for {endpoint}: {message}")]
    StatFetchFailed {
        /// The endpoint URL.
        endpoint: String,
        /// Description of the failure.
        message: String,
        /// Optional underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Stats were fetched but expectations were still unmet at the deadline.
    #[error(
        "convergence timeout after {waited:?} polling {endpoint} ({attempts} attempts): {}",
        UnmetList(unmet)
    )]
    ConvergenceTimeout {
        /// The endpoint that was polled.
        endpoint: String,
        /// Total time spent polling.
        waited: Duration,
        /// Number of snapshots evaluated.
        attempts: u32,
        /// Every expectation that was still failing, with its last value.
        unmet: Vec<UnmetExpectation>,
        /// The last fetch error, if the final attempt could not read stats.
        last_fetch_error: Option<String>,
    },

    /// Invalid harness configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl HarnessError {
    /// Create a startup failure from any error type.
    pub fn startup<E>(component: impl Into<String>, message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::EnvironmentStartupFailure {
            component: component.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a stat fetch failure from any error type.
    pub fn stat_fetch<E>(endpoint: impl Into<String>, message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::StatFetchFailed {
            endpoint: endpoint.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether this error must abort the whole test run rather than one test.
    #[must_use]
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, Self::EnvironmentStartupFailure { .. })
    }

    /// The unmet expectations carried by a convergence timeout.
    #[must_use]
    pub fn unmet_expectations(&self) -> &[UnmetExpectation] {
        match self {
            Self::ConvergenceTimeout { unmet, .. } => unmet,
            _ => &[],
        }
    }
}

/// An expectation that was still failing when polling stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmetExpectation {
    /// The counter the expectation inspects.
    pub counter: String,
    /// Human-readable predicate, e.g. `>= 1`.
    pub predicate: String,
    /// The last observed value (absent counters read as zero).
    pub observed: i64,
    /// Whether the counter was present in the last snapshot.
    pub present: bool,
}

impl fmt::Display for UnmetExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (observed {}{})",
            self.counter,
            self.predicate,
            self.observed,
            if self.present { "" } else { ", absent" }
        )
    }
}

struct UnmetList<'a>(&'a [UnmetExpectation]);

impl fmt::Display for UnmetList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "no expectation evaluated");
        }
        for (i, unmet) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{unmet}")?;
        }
        Ok(())
    }
}
