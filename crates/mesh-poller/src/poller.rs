//! The convergence poller.
//!
//! Configuration pushed over a discovery protocol reaches the proxy
//! asynchronously. [`ConvergencePoller::verify`] re-reads the proxy's counters
//! until every expectation holds or the deadline passes:
//!
//! 1. Fetch a snapshot (absent counters read as zero).
//! 2. Evaluate every expectation.
//! 3. All hold: return immediately.
//! 4. Some fail and time remains: sleep a bounded backoff, go to 1.
//! 5. Deadline passed: report every failing expectation with its last value.
//!
//! Time is measured with [`tokio::time::Instant`], which is monotonic. Each
//! request is cut short at the deadline, so a proxy that accepts connections
//! but never answers cannot hold `verify` past it.

use std::time::Duration;

use mesh_core::{HarnessError, Result, UnmetExpectation};
use metrics::counter;
use tracing::{debug, info, warn};

use crate::deadline::Deadline;
use crate::expectation::{evaluate, Expectation};
use crate::source::{HttpStatSource, StatSource};
use crate::stats::StatSnapshot;

/// Shortest time a single request is given, even at the deadline.
const MIN_REQUEST_TIMEOUT: Duration = Duration::from_millis(20);

/// Poller timing configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Sleep after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound on a single sleep.
    pub max_backoff: Duration,
    /// Timeout for a single stats request, further capped by the time left.
    pub request_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            request_timeout: Duration::from_secs(2),
        }
    }
}

/// Successful verification result.
#[derive(Debug, Clone)]
pub struct Convergence {
    /// Snapshots fetched, including the one that passed.
    pub attempts: u32,
    /// Time from the first fetch until convergence was observed.
    pub elapsed: Duration,
    /// The snapshot that satisfied every expectation.
    pub snapshot: StatSnapshot,
}

/// Polls a [`StatSource`] until expectations hold or a deadline passes.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use mesh_poller::{ConvergencePoller, Expectation, HttpStatSource};
///
/// # async fn run() -> mesh_core::Result<()> {
/// let source = HttpStatSource::admin(15000, Duration::from_secs(2))?;
/// let poller = ConvergencePoller::default();
/// poller
///     .verify(
///         &source,
///         &[Expectation::cds_converged(), Expectation::lds_not_rejected()],
///         Duration::from_secs(10),
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConvergencePoller {
    config: PollerConfig,
}

impl ConvergencePoller {
    /// Create a poller with the given timing.
    #[must_use]
    pub fn new(config: PollerConfig) -> Self {
        Self { config }
    }

    /// The poller configuration.
    #[must_use]
    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Poll `source` until every expectation holds or `deadline` elapses.
    ///
    /// # Errors
    ///
    /// - [`HarnessError::ConvergenceTimeout`] if at least one snapshot was
    ///   read but expectations were still unmet at the deadline. Carries
    ///   every unmet expectation from the last snapshot.
    /// - [`HarnessError::StatFetchFailed`] if no snapshot could be read at
    ///   all before the deadline.
    pub async fn verify(
        &self,
        source: &dyn StatSource,
        expectations: &[Expectation],
        deadline: Duration,
    ) -> Result<Convergence> {
        let deadline = Deadline::after(deadline);
        let mut backoff = self.config.initial_backoff;
        let mut attempts = 0u32;
        let mut last_unmet: Option<Vec<UnmetExpectation>> = None;
        let mut last_fetch_error: Option<HarnessError> = None;

        loop {
            attempts += 1;
            counter!("harness_convergence_polls_total").increment(1);

            let request_timeout = deadline
                .clamp(self.config.request_timeout)
                .max(MIN_REQUEST_TIMEOUT);
            match tokio::time::timeout(request_timeout, source.fetch()).await {
                Ok(Ok(snapshot)) => {
                    last_fetch_error = None;
                    let unmet = evaluate(expectations, &snapshot);
                    if unmet.is_empty() {
                        let elapsed = deadline.elapsed();
                        counter!("harness_convergence_results_total", "outcome" => "converged")
                            .increment(1);
                        info!(
                            endpoint = source.endpoint(),
                            attempts,
                            elapsed = ?elapsed,
                            expectations = expectations.len(),
                            "converged"
                        );
                        return Ok(Convergence {
                            attempts,
                            elapsed,
                            snapshot,
                        });
                    }
                    debug!(
                        endpoint = source.endpoint(),
                        attempt = attempts,
                        unmet = unmet.len(),
                        first = %unmet[0],
                        malformed = snapshot.is_malformed(),
                        "not converged yet"
                    );
                    last_unmet = Some(unmet);
                }
                Ok(Err(e)) => {
                    debug!(endpoint = source.endpoint(), attempt = attempts, error = %e, "stats fetch failed");
                    last_fetch_error = Some(e);
                }
                Err(_) => {
                    debug!(endpoint = source.endpoint(), attempt = attempts, "stats fetch timed out");
                    last_fetch_error = Some(HarnessError::StatFetchFailed {
                        endpoint: source.endpoint().to_string(),
                        message: format!("request timed out after {request_timeout:?}"),
                        source: None,
                    });
                }
            }

            if deadline.is_expired() {
                return Err(self.timed_out(source, attempts, &deadline, last_unmet, last_fetch_error));
            }

            tokio::time::sleep(deadline.clamp(backoff)).await;
            backoff = (backoff * 2).min(self.config.max_backoff);
        }
    }

    fn timed_out(
        &self,
        source: &dyn StatSource,
        attempts: u32,
        deadline: &Deadline,
        last_unmet: Option<Vec<UnmetExpectation>>,
        last_fetch_error: Option<HarnessError>,
    ) -> HarnessError {
        let waited = deadline.elapsed();
        let Some(unmet) = last_unmet else {
            counter!("harness_convergence_results_total", "outcome" => "fetch_failed").increment(1);
            warn!(endpoint = source.endpoint(), attempts, waited = ?waited, "stats never fetched");
            return last_fetch_error.unwrap_or_else(|| HarnessError::StatFetchFailed {
                endpoint: source.endpoint().to_string(),
                message: "no fetch attempted".to_string(),
                source: None,
            });
        };

        counter!("harness_convergence_results_total", "outcome" => "timeout").increment(1);
        for u in &unmet {
            warn!(endpoint = source.endpoint(), unmet = %u, "expectation unmet at deadline");
        }
        HarnessError::ConvergenceTimeout {
            endpoint: source.endpoint().to_string(),
            waited,
            attempts,
            unmet,
            last_fetch_error: last_fetch_error.map(|e| e.to_string()),
        }
    }
}

/// Poll the stats document at `stat_endpoint` over HTTP with default timing.
///
/// # Errors
///
/// See [`ConvergencePoller::verify`]. Also fails with
/// [`HarnessError::Configuration`] if the HTTP client cannot be built.
pub async fn verify(
    stat_endpoint: &str,
    expectations: &[Expectation],
    deadline: Duration,
) -> Result<Convergence> {
    let poller = ConvergencePoller::default();
    let source = HttpStatSource::new(stat_endpoint, poller.config().request_timeout)?;
    poller.verify(&source, expectations, deadline).await
}
