//! Counter expectations.
//!
//! An [`Expectation`] pairs a counter name with a [`Predicate`] on its value.
//! The helpers at the bottom of this module encode the checks that show a
//! discovery push was applied: updates succeeded and nothing was rejected.

use std::fmt;
use std::sync::Arc;

use mesh_core::UnmetExpectation;

use crate::stats::StatSnapshot;

/// A predicate on a counter value.
#[derive(Clone)]
pub enum Predicate {
    /// `value >= n`.
    AtLeast(i64),
    /// `value <= n`.
    AtMost(i64),
    /// `value == n`.
    Equals(i64),
    /// Arbitrary check with a description for reports.
    Custom {
        /// Shown in failure reports, e.g. `is even`.
        description: String,
        /// The check.
        check: Arc<dyn Fn(i64) -> bool + Send + Sync>,
    },
}

impl Predicate {
    /// Build a custom predicate.
    pub fn custom<F>(description: impl Into<String>, check: F) -> Self
    where
        F: Fn(i64) -> bool + Send + Sync + 'static,
    {
        Self::Custom {
            description: description.into(),
            check: Arc::new(check),
        }
    }

    /// Evaluate the predicate.
    #[must_use]
    pub fn holds(&self, value: i64) -> bool {
        match self {
            Self::AtLeast(n) => value >= *n,
            Self::AtMost(n) => value <= *n,
            Self::Equals(n) => value == *n,
            Self::Custom { check, .. } => check(value),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AtLeast(n) => write!(f, ">= {n}"),
            Self::AtMost(n) => write!(f, "<= {n}"),
            Self::Equals(n) => write!(f, "== {n}"),
            Self::Custom { description, .. } => f.write_str(description),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Predicate({self})")
    }
}

/// A named counter and the predicate its value must satisfy.
#[derive(Debug, Clone)]
pub struct Expectation {
    counter: String,
    predicate: Predicate,
}

impl Expectation {
    /// Create an expectation.
    pub fn new(counter: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            counter: counter.into(),
            predicate,
        }
    }

    /// `counter >= n`.
    pub fn at_least(counter: impl Into<String>, n: i64) -> Self {
        Self::new(counter, Predicate::AtLeast(n))
    }

    /// `counter <= n`.
    pub fn at_most(counter: impl Into<String>, n: i64) -> Self {
        Self::new(counter, Predicate::AtMost(n))
    }

    /// `counter == n`.
    pub fn equals(counter: impl Into<String>, n: i64) -> Self {
        Self::new(counter, Predicate::Equals(n))
    }

    /// `counter == 0`. Used for regression counters.
    pub fn zero(counter: impl Into<String>) -> Self {
        Self::equals(counter, 0)
    }

    /// The counter name.
    #[must_use]
    pub fn counter(&self) -> &str {
        &self.counter
    }

    /// The predicate.
    #[must_use]
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Evaluate against a snapshot. Absent counters read as zero.
    ///
    /// Returns `None` when satisfied.
    #[must_use]
    pub fn check(&self, snapshot: &StatSnapshot) -> Option<UnmetExpectation> {
        let present = snapshot.get(&self.counter);
        let observed = present.unwrap_or(0);
        if self.predicate.holds(observed) {
            return None;
        }
        Some(UnmetExpectation {
            counter: self.counter.clone(),
            predicate: self.predicate.to_string(),
            observed,
            present: present.is_some(),
        })
    }

    /// CDS applied at least one update.
    pub fn cds_converged() -> Self {
        Self::at_least("cluster_manager.cds.update_success", 1)
    }

    /// CDS rejected nothing.
    pub fn cds_not_rejected() -> Self {
        Self::zero("cluster_manager.cds.update_rejected")
    }

    /// LDS applied at least one update.
    pub fn lds_converged() -> Self {
        Self::at_least("listener_manager.lds.update_success", 1)
    }

    /// LDS rejected nothing.
    pub fn lds_not_rejected() -> Self {
        Self::zero("listener_manager.lds.update_rejected")
    }

    /// The discovery stream to the control plane saw no update failure.
    pub fn no_grpc_update_failure() -> Self {
        Self::zero("cluster.xds-grpc.update_failure")
    }

    /// A specific cluster received endpoint updates.
    pub fn cluster_updated(cluster: &str) -> Self {
        Self::at_least(format!("cluster.{cluster}.update_success"), 1)
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.counter, self.predicate)
    }
}

/// The checks that show clusters and listeners were pushed and accepted.
#[must_use]
pub fn standard_xds_expectations() -> Vec<Expectation> {
    vec![
        Expectation::cds_converged(),
        Expectation::cds_not_rejected(),
        Expectation::no_grpc_update_failure(),
        Expectation::lds_converged(),
        Expectation::lds_not_rejected(),
    ]
}

/// Evaluate every expectation, returning all that fail.
#[must_use]
pub fn evaluate(expectations: &[Expectation], snapshot: &StatSnapshot) -> Vec<UnmetExpectation> {
    expectations.iter().filter_map(|e| e.check(snapshot)).collect()
}
