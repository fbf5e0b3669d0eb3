//! Growth policy for the adapter's identity caches.
//!
//! Folder and node wrappers are never evicted. The kernel may hold an inode
//! number indefinitely and the backend never reports a folder going away.

use tracing::warn;

/// How cache growth is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapacityPolicy {
    /// Grow without limit.
    #[default]
    Unbounded,
    /// Grow without limit but warn each time a cache crosses another
    /// multiple of `limit` entries.
    SoftLimit(usize),
}

impl CapacityPolicy {
    /// Called after an insertion brought `cache` to `len` entries.
    pub fn record_insert(self, cache: &'static str, len: usize) {
        if self.over_limit(len) {
            warn!(cache, len, "identity cache grew past its soft limit");
        }
    }

    /// True when an insertion reaching `len` should be reported.
    pub fn over_limit(self, len: usize) -> bool {
        match self {
            CapacityPolicy::Unbounded => false,
            CapacityPolicy::SoftLimit(0) => true,
            CapacityPolicy::SoftLimit(limit) => len > limit && (len - 1) % limit == 0,
        }
    }
}
