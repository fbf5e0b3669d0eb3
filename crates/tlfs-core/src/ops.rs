//! The storage-operations interface consumed by the filesystem adapter.

use crate::context::RequestContext;
use crate::error::OpsResult;
use crate::handle::{FolderHandle, MemberResolver};
use crate::types::{BranchName, EntryInfo, FolderBranch, FolderId, Node, NodeChange, WriteRange};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Receives change notifications for the revision lines it registered for.
///
/// Callbacks run on whatever thread the backend commits changes from and
/// must not block on backend calls.
pub trait Observer: Send + Sync {
    /// A local write changed the data of `node`.
    fn local_change(&self, node: &Node, write: WriteRange);

    /// A batch of committed changes, local or remote.
    fn batch_changes(&self, changes: &[NodeChange]);
}

/// Operations the adapter needs from the storage backend.
///
/// Member resolution comes from the [`MemberResolver`] supertrait so folder
/// names can be parsed against the backend's view of identities.
#[async_trait]
pub trait StorageOps: MemberResolver + Send + Sync + 'static {
    /// Returns the root of the folder named by `handle`, creating the folder
    /// if it does not exist yet.
    ///
    /// Fails with [`OpsError::ReadAccessDenied`](crate::OpsError::ReadAccessDenied)
    /// when the caller may not read the folder.
    async fn get_or_create_root_node(
        &self,
        ctx: &RequestContext,
        handle: &FolderHandle,
        branch: &BranchName,
    ) -> OpsResult<(Node, EntryInfo)>;

    /// Returns the root of an existing folder together with its canonical handle.
    async fn get_root_node(
        &self,
        ctx: &RequestContext,
        folder_branch: &FolderBranch,
    ) -> OpsResult<(Node, EntryInfo, FolderHandle)>;

    /// Returns the caller's favorite folders.
    async fn favorite_folders(&self, ctx: &RequestContext) -> OpsResult<Vec<FolderId>>;

    /// Subscribes `observer` to changes on each of `folder_branches`.
    fn register_for_changes(
        &self,
        folder_branches: &[FolderBranch],
        observer: Arc<dyn Observer>,
    ) -> OpsResult<()>;

    /// Looks up `name` in directory `dir`.
    ///
    /// Symlinks have no node of their own and come back as `None` with their
    /// target in the entry info.
    async fn lookup(
        &self,
        ctx: &RequestContext,
        dir: &Node,
        name: &str,
    ) -> OpsResult<(Option<Node>, EntryInfo)>;

    /// Lists the entries of directory `dir`.
    async fn dir_children(
        &self,
        ctx: &RequestContext,
        dir: &Node,
    ) -> OpsResult<BTreeMap<String, EntryInfo>>;

    /// Returns current metadata for `node`.
    async fn stat(&self, ctx: &RequestContext, node: &Node) -> OpsResult<EntryInfo>;

    /// Reads up to `size` bytes of `file` starting at `offset`.
    async fn read(
        &self,
        ctx: &RequestContext,
        file: &Node,
        offset: u64,
        size: u32,
    ) -> OpsResult<Vec<u8>>;
}
