//! Stat snapshot parsing.
//!
//! The proxy exposes its counters as
//! `{"stats": [{"name": "...", "value": 1}, ...]}`. Entries without an integer
//! `value` (histogram blocks, text stats) are skipped. Counters are unsigned
//! on the proxy side; values past `i64::MAX` saturate.

use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct StatsDocument {
    #[serde(default)]
    stats: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Counter { name: String, value: i64 },
    Wide { name: String, value: u64 },
    Other(serde_json::Value),
}

/// How a snapshot was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStatus {
    /// The document parsed.
    Parsed,
    /// The document was not valid stats JSON; the snapshot is empty.
    Malformed,
}

/// A point-in-time mapping of counter name to value.
///
/// Absent counters read as zero through [`StatSnapshot::value`]; use
/// [`StatSnapshot::get`] to tell absence from an explicit zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatSnapshot {
    counters: HashMap<String, i64>,
    status: SnapshotStatus,
}

impl StatSnapshot {
    /// Parse a stats document, treating malformed input as an empty snapshot.
    #[must_use]
    pub fn parse(body: &[u8]) -> Self {
        Self::try_parse(body).unwrap_or_else(|_| Self {
            counters: HashMap::new(),
            status: SnapshotStatus::Malformed,
        })
    }

    /// Parse a stats document.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if `body` is not a stats document.
    pub fn try_parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        let doc: StatsDocument = serde_json::from_slice(body)?;
        let counters = doc
            .stats
            .into_iter()
            .filter_map(|entry| match entry {
                RawEntry::Counter { name, value } => Some((name, value)),
                RawEntry::Wide { name, value } => {
                    Some((name, i64::try_from(value).unwrap_or(i64::MAX)))
                }
                RawEntry::Other(_) => None,
            })
            .collect();
        Ok(Self {
            counters,
            status: SnapshotStatus::Parsed,
        })
    }

    /// Build a snapshot from name/value pairs.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        Self {
            counters: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            status: SnapshotStatus::Parsed,
        }
    }

    /// The value of a counter, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<i64> {
        self.counters.get(name).copied()
    }

    /// The value of a counter, zero if absent.
    #[must_use]
    pub fn value(&self, name: &str) -> i64 {
        self.get(name).unwrap_or(0)
    }

    /// How the snapshot was obtained.
    #[must_use]
    pub fn status(&self) -> SnapshotStatus {
        self.status
    }

    /// Whether the source document was malformed.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        self.status == SnapshotStatus::Malformed
    }

    /// Number of counters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether there are no counters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Counters whose name starts with `prefix`.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, i64)> + 'a {
        self.counters
            .iter()
            .filter(move |(name, _)| name.starts_with(prefix))
            .map(|(name, value)| (name.as_str(), *value))
    }
}
