//! Stat sources.
//!
//! [`StatSource`] is the seam between the poller and the proxy. The real
//! implementation is [`HttpStatSource`], which reads the proxy's admin
//! endpoint; [`StaticStatSource`] replays fixed documents.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mesh_core::{HarnessError, Result};
use tracing::{trace, warn};

use crate::stats::StatSnapshot;

/// Path of the JSON stats document on the proxy admin listener.
pub const STATS_PATH: &str = "/stats?format=json";

/// Something that produces counter snapshots.
#[async_trait]
pub trait StatSource: Send + Sync {
    /// Where the stats come from, for reports.
    fn endpoint(&self) -> &str;

    /// Fetch the current snapshot.
    ///
    /// A document that arrives but does not parse yields an empty, malformed
    /// snapshot rather than an error. Errors mean nothing could be read.
    async fn fetch(&self) -> Result<StatSnapshot>;
}

/// Reads stats over HTTP from a proxy admin listener.
#[derive(Debug, Clone)]
pub struct HttpStatSource {
    client: reqwest::Client,
    url: String,
}

impl HttpStatSource {
    /// Read stats from an explicit URL.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| HarnessError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Read stats from the admin listener on `127.0.0.1:admin_port`.
    pub fn admin(admin_port: u16, request_timeout: Duration) -> Result<Self> {
        Self::new(format!("http://127.0.0.1:{admin_port}{STATS_PATH}"), request_timeout)
    }
}

#[async_trait]
impl StatSource for HttpStatSource {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<StatSnapshot> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| HarnessError::stat_fetch(&self.url, "request failed", e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(HarnessError::StatFetchFailed {
                endpoint: self.url.clone(),
                message: format!("unexpected HTTP status {status}"),
                source: None,
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| HarnessError::stat_fetch(&self.url, "failed to read body", e))?;

        let snapshot = StatSnapshot::parse(&body);
        if snapshot.is_malformed() {
            warn!(endpoint = %self.url, bytes = body.len(), "stats document is malformed, treating as empty");
        } else {
            trace!(endpoint = %self.url, counters = snapshot.len(), "fetched stats");
        }
        Ok(snapshot)
    }
}

/// Replays a fixed sequence of stats documents.
///
/// Each fetch returns the next document; once exhausted the last one repeats.
#[derive(Debug)]
pub struct StaticStatSource {
    name: String,
    documents: Vec<Vec<u8>>,
    fetches: AtomicUsize,
}

impl StaticStatSource {
    /// Always return the same document.
    pub fn new(document: impl Into<Vec<u8>>) -> Self {
        Self::sequence([document])
    }

    /// Return documents in order, then keep returning the last.
    pub fn sequence<I, D>(documents: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Vec<u8>>,
    {
        Self {
            name: "static".to_string(),
            documents: documents.into_iter().map(Into::into).collect(),
            fetches: AtomicUsize::new(0),
        }
    }

    /// How many times the source was fetched.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatSource for StaticStatSource {
    fn endpoint(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<StatSnapshot> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst);
        let doc = self
            .documents
            .get(n)
            .or_else(|| self.documents.last())
            .ok_or_else(|| HarnessError::StatFetchFailed {
                endpoint: self.name.clone(),
                message: "no documents configured".to_string(),
                source: None,
            })?;
        Ok(StatSnapshot::parse(doc))
    }
}
