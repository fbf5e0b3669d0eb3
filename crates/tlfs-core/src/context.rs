//! Request context with cooperative cancellation.
//!
//! Every storage operation receives a [`RequestContext`]. A context is
//! cancelled when any of the signals it was derived from fires, so a child
//! created with [`RequestContext::child`] observes both its own
//! [`CancelHandle`] and every ancestor's.

use futures::future::select_all;
use std::future::pending;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared, cloneable request context.
#[derive(Debug, Clone)]
pub struct RequestContext {
    signals: Arc<[watch::Receiver<bool>]>,
}

/// Cancels the context it was created with.
///
/// Dropping the handle without calling [`cancel`](Self::cancel) leaves the
/// context live forever.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl RequestContext {
    /// Creates a cancellable root context.
    pub fn new() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                signals: Arc::from(vec![rx]),
            },
            CancelHandle { tx },
        )
    }

    /// A context that is never cancelled.
    pub fn background() -> Self {
        let (ctx, _handle) = Self::new();
        ctx
    }

    /// Derives a context that is cancelled by the returned handle or by any
    /// cancellation of `self`.
    pub fn child(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let mut signals = self.signals.to_vec();
        signals.push(rx);
        (
            Self {
                signals: Arc::from(signals),
            },
            CancelHandle { tx },
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.signals.iter().any(|rx| *rx.borrow())
    }

    /// Completes once the context is cancelled.
    pub async fn cancelled(&self) {
        let waits = self.signals.iter().map(|rx| {
            let mut rx = rx.clone();
            Box::pin(async move {
                let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                if closed {
                    // Sender dropped without cancelling: never fires.
                    pending::<()>().await;
                }
            })
        });
        select_all(waits).await;
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_fires() {
        let (ctx, handle) = RequestContext::new();
        assert!(!ctx.is_cancelled());
        handle.cancel();
        assert!(ctx.is_cancelled());
        assert!(handle.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), ctx.cancelled())
            .await
            .expect("cancelled() should complete");
    }

    #[tokio::test]
    async fn test_background_never_fires() {
        let ctx = RequestContext::background();
        let res = tokio::time::timeout(Duration::from_millis(20), ctx.cancelled()).await;
        assert!(res.is_err());
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_cancels_child() {
        let (parent, handle) = RequestContext::new();
        let (child, _child_handle) = parent.child();
        handle.cancel();
        assert!(child.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), child.cancelled())
            .await
            .expect("child should observe parent cancellation");
    }

    #[tokio::test]
    async fn test_child_does_not_cancel_parent() {
        let (parent, _handle) = RequestContext::new();
        let (child, child_handle) = parent.child();
        child_handle.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let (ctx, handle) = RequestContext::new();
        let waiter = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.cancelled().await }
        });
        tokio::task::yield_now().await;
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
