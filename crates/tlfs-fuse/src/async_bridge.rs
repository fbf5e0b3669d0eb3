//! Bridge between sync FUSE callbacks and async folder operations.
//!
//! Each kernel request is spawned as its own task on the tokio runtime and
//! answered from that task, so a slow backend call on one folder never holds
//! up requests for another. Every task is bounded by a timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tlfs_core::RequestContext;
use tokio::runtime::Handle;

/// Statistics for async bridge operations (for observability).
#[derive(Debug, Default)]
pub struct BridgeStats {
    pub operations_started: AtomicU64,
    pub operations_completed: AtomicU64,
    pub operations_timed_out: AtomicU64,
    pub operations_cancelled: AtomicU64,
}

impl BridgeStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_start(&self) {
        self.operations_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_complete(&self) {
        self.operations_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.operations_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.operations_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests spawned but not yet answered.
    pub fn in_flight(&self) -> u64 {
        let started = self.operations_started.load(Ordering::Relaxed);
        let finished = self.operations_completed.load(Ordering::Relaxed)
            + self.operations_timed_out.load(Ordering::Relaxed)
            + self.operations_cancelled.load(Ordering::Relaxed);
        started.saturating_sub(finished)
    }
}

/// Error from async bridge operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("operation was cancelled")]
    Cancelled,
}

impl BridgeError {
    pub fn to_errno(&self) -> i32 {
        match self {
            BridgeError::Timeout(_) => libc::ETIMEDOUT,
            BridgeError::Cancelled => libc::ECANCELED,
        }
    }
}

/// Runs `future` on the runtime and hands its outcome to `complete`.
///
/// Returns immediately. `complete` runs exactly once on a runtime thread,
/// with the future's output, with [`BridgeError::Timeout`] after the future
/// was dropped at the deadline, or with [`BridgeError::Cancelled`] once `ctx`
/// is cancelled.
pub fn dispatch<F, T, C>(
    handle: &Handle,
    timeout: Duration,
    ctx: &RequestContext,
    stats: &Arc<BridgeStats>,
    future: F,
    complete: C,
) where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
    C: FnOnce(Result<T, BridgeError>) + Send + 'static,
{
    stats.record_start();
    let stats = Arc::clone(stats);
    let ctx = ctx.clone();
    handle.spawn(async move {
        let outcome = tokio::select! {
            biased;
            () = ctx.cancelled() => Err(BridgeError::Cancelled),
            result = tokio::time::timeout(timeout, future) => {
                result.map_err(|_elapsed| BridgeError::Timeout(timeout))
            }
        };
        match &outcome {
            Ok(_) => stats.record_complete(),
            Err(BridgeError::Timeout(_)) => stats.record_timeout(),
            Err(BridgeError::Cancelled) => stats.record_cancelled(),
        }
        complete(outcome);
    });
}
