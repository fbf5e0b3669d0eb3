//! Mount configuration for the FUSE filesystem.

use crate::cache_policy::CapacityPolicy;
use std::time::Duration;

/// Default kernel cache TTL for attributes and entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(1);

/// Default I/O timeout for a single kernel request.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of concurrent root fetches when listing favorites.
pub const FAVORITE_WORKERS: usize = 10;

/// Filesystem name reported to the kernel.
pub const DEFAULT_FS_NAME: &str = "tlfs";

/// Configuration options for the FUSE filesystem.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Time-to-live the kernel may cache file attributes for.
    pub attr_ttl: Duration,

    /// Time-to-live the kernel may cache name lookups for.
    ///
    /// Change notifications invalidate entries early, so this mostly bounds
    /// staleness when a notification is lost.
    pub entry_ttl: Duration,

    /// Timeout for a single kernel request.
    ///
    /// Requests that exceed it fail with ETIMEDOUT and their backend work is
    /// dropped.
    pub io_timeout: Duration,

    /// Concurrent root fetches used to list the root directory.
    pub favorite_workers: usize,

    /// Trace every protocol request at debug level.
    pub debug: bool,

    /// Name shown in the mount table.
    pub fs_name: String,

    /// Let other users access the mount (`allow_other`).
    pub allow_other: bool,

    /// Growth policy for folder and node caches.
    pub capacity_policy: CapacityPolicy,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            attr_ttl: DEFAULT_TTL,
            entry_ttl: DEFAULT_TTL,
            io_timeout: DEFAULT_IO_TIMEOUT,
            favorite_workers: FAVORITE_WORKERS,
            debug: false,
            fs_name: DEFAULT_FS_NAME.to_string(),
            allow_other: false,
            capacity_policy: CapacityPolicy::Unbounded,
        }
    }
}

impl MountConfig {
    /// Sets the cache TTL for file attributes.
    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    /// Sets the cache TTL for name lookups.
    #[must_use]
    pub fn entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    /// Sets the I/O timeout for individual requests.
    #[must_use]
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Sets the worker count for favorites listing. Zero is treated as one.
    #[must_use]
    pub fn favorite_workers(mut self, workers: usize) -> Self {
        self.favorite_workers = workers.max(1);
        self
    }

    /// Enables protocol tracing.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn fs_name(mut self, name: impl Into<String>) -> Self {
        self.fs_name = name.into();
        self
    }

    #[must_use]
    pub fn allow_other(mut self, allow: bool) -> Self {
        self.allow_other = allow;
        self
    }

    #[must_use]
    pub fn capacity_policy(mut self, policy: CapacityPolicy) -> Self {
        self.capacity_policy = policy;
        self
    }
}
