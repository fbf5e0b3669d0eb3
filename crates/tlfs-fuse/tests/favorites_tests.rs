//! Root directory listing through the favorites enumerator.

mod common;

use common::*;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tlfs_core::memory::MemoryOps;
use tlfs_core::{
    BranchName, EntryInfo, EntryType, FolderBranch, FolderHandle, FolderId, MemberResolver, Node,
    Observer, OpsError, OpsResult, RequestContext, StorageOps,
};
use tlfs_fuse::{FsError, list_favorites};

fn name_set(entries: &[tlfs_fuse::DirEntry]) -> HashSet<String> {
    entries.iter().map(|e| e.name.clone()).collect()
}

#[tokio::test]
async fn test_lists_canonical_names() {
    let fx = Fixture::new("alice");
    let a = fx.ops.create_folder("bob,alice").unwrap();
    let b = fx.ops.create_folder("carol").unwrap();
    fx.ops.add_favorite(a);
    fx.ops.add_favorite(b);
    let ctx = RequestContext::background();

    let entries = list_favorites(&fx.dyn_ops(), &ctx, 10).await.unwrap();

    assert_eq!(
        name_set(&entries),
        HashSet::from(["alice,bob".to_string(), "carol".to_string()])
    );
    assert!(entries.iter().all(|e| e.kind == EntryType::Dir));
    assert_eq!(fx.ops.calls().favorites(), 1);
    assert_eq!(fx.ops.calls().get_root(), 2);
}

#[tokio::test]
async fn test_one_failure_fails_the_listing() {
    let fx = Fixture::new("alice");
    let a = fx.ops.create_folder("alice,bob").unwrap();
    // Readable by alice only through its public side.
    let b = fx.ops.create_folder("carol").unwrap();
    fx.ops.create_folder("carol@public").unwrap();
    let c = fx.ops.create_folder("dave").unwrap();
    for id in [a, b, c] {
        fx.ops.add_favorite(id);
    }
    fx.ops
        .fail_root(c, OpsError::Unavailable("dave is offline".to_string()));
    let ctx = RequestContext::background();

    let err = list_favorites(&fx.dyn_ops(), &ctx, 10).await.unwrap_err();
    assert!(matches!(err, FsError::Ops(OpsError::Unavailable(_))));

    fx.ops.remove_favorite(c);
    let entries = list_favorites(&fx.dyn_ops(), &ctx, 10).await.unwrap();
    assert_eq!(
        name_set(&entries),
        HashSet::from(["alice,bob".to_string(), "carol".to_string()])
    );

    let carol = fx.root().lookup(&ctx, "carol").await.unwrap();
    let listing = as_dir(&carol).read_dir(&ctx).await.unwrap();
    assert_eq!(names(&listing), ["public"]);
}

#[tokio::test]
async fn test_empty_favorites() {
    let fx = Fixture::new("alice");
    let ctx = RequestContext::background();
    let entries = list_favorites(&fx.dyn_ops(), &ctx, 10).await.unwrap();
    assert!(entries.is_empty());
    assert_eq!(fx.ops.calls().get_root(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_more_folders_than_workers() {
    let fx = Fixture::new("alice");
    let mut expected = HashSet::new();
    for i in 0..57 {
        let name = format!("alice,user{i}");
        expected.insert(name.clone());
        let id = fx.ops.create_folder(&name).unwrap();
        fx.ops.add_favorite(id);
    }
    let ctx = RequestContext::background();

    for workers in [1, 3, 10, 100] {
        let entries = list_favorites(&fx.dyn_ops(), &ctx, workers).await.unwrap();
        assert_eq!(entries.len(), 57, "workers={workers}");
        assert_eq!(name_set(&entries), expected, "workers={workers}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_stops_slow_fetches() {
    let fx = Fixture::new("alice");
    let mut slow = Vec::new();
    for i in 0..5 {
        let id = fx.ops.create_folder(&format!("alice,slow{i}")).unwrap();
        fx.ops.set_latency(id, Duration::from_secs(60));
        fx.ops.add_favorite(id);
        slow.push(id);
    }
    let broken = fx.ops.create_folder("alice,broken").unwrap();
    fx.ops
        .fail_root(broken, OpsError::Unavailable("broken".to_string()));
    fx.ops.add_favorite(broken);
    let ctx = RequestContext::background();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        list_favorites(&fx.dyn_ops(), &ctx, 10),
    )
    .await
    .expect("listing should fail fast instead of waiting for slow folders");
    assert!(matches!(result, Err(FsError::Ops(OpsError::Unavailable(_)))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_caller_cancellation() {
    let fx = Fixture::new("alice");
    let id = fx.ops.create_folder("alice").unwrap();
    fx.ops.set_latency(id, Duration::from_secs(60));
    fx.ops.add_favorite(id);
    let (ctx, cancel) = RequestContext::new();

    let ops = fx.dyn_ops();
    let listing = tokio::spawn(async move { list_favorites(&ops, &ctx, 10).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), listing)
        .await
        .expect("cancelled listing should return promptly")
        .unwrap();
    let err = result.unwrap_err();
    assert!(err.is_cancelled(), "unexpected error: {err}");
    assert_eq!(err.to_errno(), libc::ECANCELED);
}

#[tokio::test]
async fn test_root_read_dir_lists_favorites() {
    let fx = Fixture::new("alice");
    let a = fx.ops.create_folder("alice").unwrap();
    let b = fx.ops.create_folder("alice#bob").unwrap();
    fx.ops.add_favorite(a);
    fx.ops.add_favorite(b);
    fx.ops.create_folder("not,a,favorite").unwrap();
    let root = fx.root();
    let ctx = RequestContext::background();

    let entries = root.read_dir(&ctx).await.unwrap();
    assert_eq!(names(&entries), ["alice", "alice#bob"]);
}

/// Backend whose root fetch for one folder panics.
struct PanickingRoot {
    inner: MemoryOps,
    folder: FolderId,
}

impl MemberResolver for PanickingRoot {}

#[async_trait]
impl StorageOps for PanickingRoot {
    async fn get_or_create_root_node(
        &self,
        ctx: &RequestContext,
        handle: &FolderHandle,
        branch: &BranchName,
    ) -> OpsResult<(Node, EntryInfo)> {
        self.inner.get_or_create_root_node(ctx, handle, branch).await
    }

    async fn get_root_node(
        &self,
        ctx: &RequestContext,
        folder_branch: &FolderBranch,
    ) -> OpsResult<(Node, EntryInfo, FolderHandle)> {
        assert_ne!(folder_branch.folder, self.folder, "root fetch blew up");
        self.inner.get_root_node(ctx, folder_branch).await
    }

    async fn favorite_folders(&self, ctx: &RequestContext) -> OpsResult<Vec<FolderId>> {
        self.inner.favorite_folders(ctx).await
    }

    fn register_for_changes(
        &self,
        folder_branches: &[FolderBranch],
        observer: Arc<dyn Observer>,
    ) -> OpsResult<()> {
        self.inner.register_for_changes(folder_branches, observer)
    }

    async fn lookup(
        &self,
        ctx: &RequestContext,
        dir: &Node,
        name: &str,
    ) -> OpsResult<(Option<Node>, EntryInfo)> {
        self.inner.lookup(ctx, dir, name).await
    }

    async fn dir_children(
        &self,
        ctx: &RequestContext,
        dir: &Node,
    ) -> OpsResult<BTreeMap<String, EntryInfo>> {
        self.inner.dir_children(ctx, dir).await
    }

    async fn stat(&self, ctx: &RequestContext, node: &Node) -> OpsResult<EntryInfo> {
        self.inner.stat(ctx, node).await
    }

    async fn read(
        &self,
        ctx: &RequestContext,
        file: &Node,
        offset: u64,
        size: u32,
    ) -> OpsResult<Vec<u8>> {
        self.inner.read(ctx, file, offset, size).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_panic_fails_the_listing() {
    let inner = MemoryOps::new("alice");
    let own = inner.create_folder("alice").unwrap();
    let shared = inner.create_folder("alice,bob").unwrap();
    inner.add_favorite(own);
    inner.add_favorite(shared);
    let ops: Arc<dyn StorageOps> = Arc::new(PanickingRoot {
        inner,
        folder: shared,
    });
    let ctx = RequestContext::background();

    for workers in [1, 10] {
        let err = list_favorites(&ops, &ctx, workers).await.unwrap_err();
        assert!(matches!(err, FsError::Worker(_)), "workers={workers}: {err}");
        assert_eq!(err.to_errno(), libc::EIO);
    }
}
