//! Node hashing.
//!
//! [`NodeHash`] is a fixed-size FNV-1a digest of a proxy node ID. Proxy
//! startup logs carry it and the proxy's scratch directory is named after
//! it, so a running process can be matched to its identity at a glance.

use std::fmt;
use std::hash::{Hash, Hasher};

use fnv::FnvHasher;

/// Hash-based node identifier.
///
/// # Example
///
/// ```rust
/// use mesh_core::NodeHash;
///
/// let a = NodeHash::from_id("sidecar~10.2.0.1~app3");
/// let b = NodeHash::from_id("sidecar~10.2.0.2~app3");
/// assert_ne!(a, b);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeHash(u64);

impl NodeHash {
    /// Create a node hash from a node ID string.
    #[must_use]
    pub fn from_id(node_id: &str) -> Self {
        let mut hasher = FnvHasher::default();
        node_id.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Get the raw hash value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
