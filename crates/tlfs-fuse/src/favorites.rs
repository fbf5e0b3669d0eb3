//! Root directory listing from the caller's favorite folders.
//!
//! Each favorite needs its own root fetch to learn the canonical name, so
//! fetches run on a fixed pool of workers pulling from a preloaded queue.

use crate::error::{FsError, FsResult};
use crate::node::DirEntry;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use tlfs_core::{FolderBranch, FolderId, RequestContext, StorageOps};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, trace};

/// Lists the caller's favorite folders as directory entries.
///
/// Fails with the first error any fetch reports; a partial listing is never
/// returned. Entry order is unspecified.
pub async fn list_favorites(
    ops: &Arc<dyn StorageOps>,
    ctx: &RequestContext,
    workers: usize,
) -> FsResult<Vec<DirEntry>> {
    let ids = ops.favorite_folders(ctx).await?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let total = ids.len();
    let workers = workers.clamp(1, total);

    let (queue_tx, queue) = crossbeam_channel::unbounded();
    for id in ids {
        // The receiver is alive, so this cannot fail.
        let _ = queue_tx.send(id);
    }
    drop(queue_tx);

    let (work_ctx, cancel) = ctx.child();
    let (results_tx, mut results) = mpsc::channel(workers);
    let mut set = JoinSet::new();
    for _ in 0..workers {
        set.spawn(fetch_names(
            Arc::clone(ops),
            work_ctx.clone(),
            queue.clone(),
            results_tx.clone(),
        ));
    }
    drop(results_tx);

    let mut entries = Vec::with_capacity(total);
    let failure = loop {
        let next = tokio::select! {
            biased;
            () = ctx.cancelled() => Some(Err(FsError::Cancelled)),
            next = results.recv() => next,
        };
        match next {
            Some(Ok(entry)) => entries.push(entry),
            Some(Err(e)) => break Some(e),
            None => break None,
        }
    };

    if let Some(err) = failure {
        debug!(error = %err, listed = entries.len(), total, "favorites listing failed");
        cancel.cancel();
        drop(results);
        set.shutdown().await;
        return Err(err);
    }

    // Every sender is gone, so every worker has returned. A worker that
    // panicked dropped its sender without reporting.
    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            debug!(error = %e, listed = entries.len(), total, "favorites worker died");
            set.shutdown().await;
            return Err(FsError::Worker(e.to_string()));
        }
    }
    if entries.len() != total {
        return Err(FsError::Worker(format!(
            "listed {} of {total} favorite folders",
            entries.len()
        )));
    }
    trace!(count = entries.len(), "listed favorites");
    Ok(entries)
}

async fn fetch_names(
    ops: Arc<dyn StorageOps>,
    ctx: RequestContext,
    queue: Receiver<FolderId>,
    results: mpsc::Sender<FsResult<DirEntry>>,
) {
    while let Ok(id) = queue.try_recv() {
        let entry = if ctx.is_cancelled() {
            Err(FsError::Cancelled)
        } else {
            ops.get_root_node(&ctx, &FolderBranch::master(id))
                .await
                .map(|(_, _, handle)| DirEntry::dir(handle.canonical_name()))
                .map_err(FsError::from)
        };
        let failed = entry.is_err();
        if results.send(entry).await.is_err() || failed {
            break;
        }
    }
}
