//! Directories inside a folder.

use crate::error::{FsError, FsResult};
use crate::folder::Folder;
use crate::node::{DirEntry, FsNode, NodeKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tlfs_core::{BranchName, EntryInfo, EntryType, Node, PUBLIC_DIR_NAME, RequestContext};
use tokio::sync::OnceCell;
use tracing::debug;

/// A directory in a folder, or a folder's root.
///
/// A folder root the caller may not read has no backend node. Such a
/// directory only contains the `public` child.
pub struct Dir {
    folder: Arc<Folder>,
    node: Option<Node>,
    has_public: AtomicBool,
    public: OnceCell<Arc<FsNode>>,
    links: Mutex<HashMap<String, Arc<FsNode>>>,
}

impl Dir {
    pub(crate) fn new(folder: Arc<Folder>, node: Option<Node>) -> Self {
        Self {
            folder,
            node,
            has_public: AtomicBool::new(false),
            public: OnceCell::new(),
            links: Mutex::new(HashMap::new()),
        }
    }

    pub fn folder(&self) -> &Arc<Folder> {
        &self.folder
    }

    /// Backend node, `None` for an unreadable folder root.
    pub fn node(&self) -> Option<&Node> {
        self.node.as_ref()
    }

    /// True when this directory exposes a `public` child.
    pub fn has_public(&self) -> bool {
        self.has_public.load(Ordering::Acquire)
    }

    pub(crate) fn set_has_public(&self, has_public: bool) {
        self.has_public.store(has_public, Ordering::Release);
    }

    /// Current backend metadata, `None` for an unreadable folder root.
    pub async fn stat(&self, ctx: &RequestContext) -> FsResult<Option<EntryInfo>> {
        match &self.node {
            Some(node) => Ok(Some(self.folder.ops().stat(ctx, node).await?)),
            None => Ok(None),
        }
    }

    /// Resolves `name` in this directory.
    pub async fn lookup(&self, ctx: &RequestContext, name: &str) -> FsResult<Arc<FsNode>> {
        if name == PUBLIC_DIR_NAME && self.has_public() {
            return self.public_dir(ctx).await;
        }
        let Some(dir) = &self.node else {
            return Err(FsError::NotFound(name.to_string()));
        };
        if let Some(link) = self.links.lock().get(name) {
            return Ok(Arc::clone(link));
        }

        let (child, info) = self.folder.ops().lookup(ctx, dir, name).await?;
        match child {
            Some(child) => Ok(self.folder.get_or_create(child, &info)),
            None => Ok(self.link(name, &info)),
        }
    }

    /// Lists this directory.
    pub async fn read_dir(&self, ctx: &RequestContext) -> FsResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        if let Some(dir) = &self.node {
            let children = self.folder.ops().dir_children(ctx, dir).await?;
            entries.extend(
                children
                    .into_iter()
                    .filter(|(name, _)| !(self.has_public() && name == PUBLIC_DIR_NAME))
                    .map(|(name, info)| DirEntry::new(name, info.kind)),
            );
        }
        if self.has_public() {
            entries.push(DirEntry::dir(PUBLIC_DIR_NAME));
        }
        Ok(entries)
    }

    /// Drops the cached symlink called `name`, if any.
    pub(crate) fn forget_child(&self, name: &str) {
        self.links.lock().remove(name);
    }

    fn link(&self, name: &str, info: &EntryInfo) -> Arc<FsNode> {
        let mut links = self.links.lock();
        if let Some(existing) = links.get(name) {
            return Arc::clone(existing);
        }
        let kind = match info.kind {
            EntryType::Symlink => NodeKind::Symlink {
                target: info.symlink_target.clone().unwrap_or_default(),
                mtime: info.mtime,
            },
            // Backends only omit the node for symlinks; anything else is
            // shown as an empty link rather than failing the lookup.
            _ => NodeKind::Symlink {
                target: String::new(),
                mtime: info.mtime,
            },
        };
        let wrapper = self.folder.state().inodes().insert(kind);
        links.insert(name.to_string(), Arc::clone(&wrapper));
        wrapper
    }

    /// Root of the folder's public subtree, resolved once.
    async fn public_dir(&self, ctx: &RequestContext) -> FsResult<Arc<FsNode>> {
        self.public
            .get_or_try_init(|| async {
                let handle = self.folder.handle().to_public();
                let (node, info) = self
                    .folder
                    .ops()
                    .get_or_create_root_node(ctx, &handle, &BranchName::master())
                    .await?;
                debug!(folder = %handle, "resolved public subtree");
                let folder_branch = node.folder_branch().clone();
                let folder = Folder::open(self.folder.state(), handle, folder_branch)?;
                Ok::<_, FsError>(folder.get_or_create(node, &info))
            })
            .await
            .map(Arc::clone)
    }
}
