//! Deadlines that never overflow.
//!
//! `Instant + Duration` panics when the sum is not representable, and callers
//! routinely pass `Duration::MAX` to mean "no limit". [`Deadline::after`]
//! clamps such values to a far-future bound instead.

use std::time::Duration;

use tokio::time::Instant;

/// Roughly 30 years, the same horizon tokio uses for unbounded sleeps.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A point in time measured from when it was created.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    until: Instant,
}

impl Deadline {
    /// A deadline `timeout` from now. Unrepresentable timeouts are clamped.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        let start = Instant::now();
        let until = start
            .checked_add(timeout)
            .or_else(|| start.checked_add(FAR_FUTURE))
            .unwrap_or(start);
        Self { start, until }
    }

    /// Time since the deadline was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time left, zero once passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.until.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.until
    }

    /// `wait`, shortened so it ends no later than the deadline.
    #[must_use]
    pub fn clamp(&self, wait: Duration) -> Duration {
        wait.min(self.remaining())
    }
}
