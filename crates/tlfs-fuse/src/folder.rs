//! Per-folder node identity cache and change observer.
//!
//! A [`Folder`] guarantees that one backend node is represented by exactly
//! one wrapper (and thus one inode) for the life of the mount. It is also the
//! observer registered with the backend for the folder's revision line:
//! committed changes are turned into kernel invalidations for the wrappers
//! it has handed out.

use crate::dir::Dir;
use crate::error::FsResult;
use crate::node::{FileNode, FsNode, NodeKind};
use crate::state::FsState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::io;
use std::sync::Arc;
use tlfs_core::{
    EntryInfo, EntryType, FolderBranch, FolderHandle, Node, NodeChange, NodeId, Observer,
    StorageOps, WriteRange,
};
use tracing::{debug, trace, warn};

/// One resolved top-level folder.
pub struct Folder {
    state: Arc<FsState>,
    handle: FolderHandle,
    folder_branch: FolderBranch,
    nodes: Mutex<HashMap<NodeId, Arc<FsNode>>>,
}

impl Folder {
    /// Creates a folder and registers it for changes on `folder_branch`.
    ///
    /// A folder whose root could not be read uses
    /// [`FolderBranch::unresolved`].
    pub fn open(
        state: &Arc<FsState>,
        handle: FolderHandle,
        folder_branch: FolderBranch,
    ) -> FsResult<Arc<Self>> {
        let folder = Arc::new(Self {
            state: Arc::clone(state),
            handle,
            folder_branch,
            nodes: Mutex::new(HashMap::new()),
        });
        let observer: Arc<dyn Observer> = Arc::clone(&folder) as Arc<dyn Observer>;
        state
            .ops()
            .register_for_changes(std::slice::from_ref(&folder.folder_branch), observer)?;
        state.track(Arc::clone(&folder));
        debug!(
            folder = %folder.handle,
            folder_branch = %folder.folder_branch,
            "registered folder for changes"
        );
        Ok(folder)
    }

    pub fn handle(&self) -> &FolderHandle {
        &self.handle
    }

    pub fn folder_branch(&self) -> &FolderBranch {
        &self.folder_branch
    }

    pub fn ops(&self) -> &Arc<dyn StorageOps> {
        self.state.ops()
    }

    pub(crate) fn state(&self) -> &Arc<FsState> {
        &self.state
    }

    /// Returns the wrapper for `node`, creating it on first sight.
    ///
    /// Concurrent callers with the same node id all receive the same wrapper.
    pub fn get_or_create(self: &Arc<Self>, node: Node, info: &EntryInfo) -> Arc<FsNode> {
        let mut nodes = self.nodes.lock();
        if let Some(existing) = nodes.get(&node.id()) {
            return Arc::clone(existing);
        }
        let id = node.id();
        let kind = match info.kind {
            EntryType::Dir => NodeKind::Dir(Dir::new(Arc::clone(self), Some(node))),
            EntryType::File => NodeKind::File(FileNode::new(Arc::clone(self), node, false)),
            EntryType::Exec => NodeKind::File(FileNode::new(Arc::clone(self), node, true)),
            EntryType::Symlink => NodeKind::Symlink {
                target: info.symlink_target.clone().unwrap_or_default(),
                mtime: info.mtime,
            },
        };
        let wrapper = self.state.inodes().insert(kind);
        nodes.insert(id, Arc::clone(&wrapper));
        self.state.policy().record_insert("nodes", nodes.len());
        trace!(folder = %self.handle, node = %id, ino = wrapper.ino(), "new node wrapper");
        wrapper
    }

    /// Wraps a root directory that has no readable backend object.
    ///
    /// The wrapper is not cached; the caller owns the only reference.
    pub fn unresolved_root(self: &Arc<Self>) -> Arc<FsNode> {
        self.state
            .inodes()
            .insert(NodeKind::Dir(Dir::new(Arc::clone(self), None)))
    }

    /// The wrapper for `id`, if one was created.
    pub fn cached(&self, id: NodeId) -> Option<Arc<FsNode>> {
        self.nodes.lock().get(&id).cloned()
    }

    /// Number of cached wrappers.
    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }

    pub(crate) fn clear(&self) {
        self.nodes.lock().clear();
    }

    fn invalidate_data(&self, wrapper: &FsNode, write: WriteRange) {
        let offset = i64::try_from(write.offset).unwrap_or(i64::MAX);
        let len = i64::try_from(write.len).unwrap_or(i64::MAX);
        report(
            self.state.invalidator().inval_inode(wrapper.ino(), offset, len),
            wrapper.ino(),
        );
    }

    fn invalidate_entry(&self, wrapper: &FsNode, name: &str) {
        if let Some(dir) = wrapper.as_dir() {
            dir.forget_child(name);
        }
        report(
            self.state
                .invalidator()
                .inval_entry(wrapper.ino(), OsStr::new(name)),
            wrapper.ino(),
        );
    }
}

fn report(result: io::Result<()>, ino: u64) {
    match result {
        Ok(()) => {}
        // The kernel had nothing cached for this inode.
        Err(e) if e.raw_os_error() == Some(libc::ENOENT) => {
            trace!(ino, "nothing to invalidate");
        }
        Err(e) => warn!(ino, error = %e, "kernel invalidation failed"),
    }
}

impl Observer for Folder {
    fn local_change(&self, node: &Node, write: WriteRange) {
        if let Some(wrapper) = self.cached(node.id()) {
            self.invalidate_data(&wrapper, write);
        }
    }

    fn batch_changes(&self, changes: &[NodeChange]) {
        for change in changes {
            let Some(wrapper) = self.cached(change.node.id()) else {
                continue;
            };
            for write in &change.file_updated {
                self.invalidate_data(&wrapper, *write);
            }
            for name in &change.dir_updated {
                self.invalidate_entry(&wrapper, name);
            }
            if !change.dir_updated.is_empty() {
                // Directory size and mtime changed too.
                report(
                    self.state.invalidator().inval_inode(wrapper.ino(), -1, 0),
                    wrapper.ino(),
                );
            }
        }
    }
}
