//! The mount's root directory: resolves folder names.
//!
//! Every name looked up at the root is a folder name. A name that is not in
//! canonical form becomes an alias (a symlink to the canonical name); a
//! canonical name is resolved through the backend once and then served from
//! the cache for the life of the mount.

use crate::error::{FsError, FsResult};
use crate::favorites::list_favorites;
use crate::folder::Folder;
use crate::node::{DirEntry, FsNode, NodeKind};
use crate::state::FsState;
use std::collections::HashMap;
use std::sync::Arc;
use tlfs_core::{BranchName, FolderBranch, FolderHandle, RequestContext};
use tokio::sync::Mutex;
use tracing::{debug, trace};

#[derive(Default)]
struct RootCache {
    /// Requested (canonical) name to folder root wrapper.
    folders: HashMap<String, Arc<FsNode>>,
    /// Requested (non-canonical) name to alias wrapper.
    aliases: HashMap<String, Arc<FsNode>>,
}

/// Folder-name resolver behind the root inode.
pub struct Root {
    state: Arc<FsState>,
    favorite_workers: usize,
    cache: Mutex<RootCache>,
}

impl Root {
    pub fn new(state: Arc<FsState>, favorite_workers: usize) -> Self {
        Self {
            state,
            favorite_workers,
            cache: Mutex::new(RootCache::default()),
        }
    }

    pub fn state(&self) -> &Arc<FsState> {
        &self.state
    }

    /// Resolves the top-level entry `name`.
    ///
    /// Resolution is serialized: one lookup at a time per root, including
    /// the backend call.
    pub async fn lookup(&self, ctx: &RequestContext, name: &str) -> FsResult<Arc<FsNode>> {
        let mut cache = self.cache.lock().await;
        if let Some(hit) = cache.folders.get(name).or_else(|| cache.aliases.get(name)) {
            trace!(name, ino = hit.ino(), "root cache hit");
            return Ok(Arc::clone(hit));
        }

        let ops = self.state.ops();
        let handle = match FolderHandle::parse(name, ops.as_ref()) {
            Ok(handle) => handle,
            Err(e) => {
                trace!(name, error = %e, "not a folder name");
                return Err(FsError::NotFound(name.to_string()));
            }
        };
        // Public folders are only reachable through their private parent.
        if handle.is_public() {
            return Err(FsError::NotFound(name.to_string()));
        }

        let canonical = handle.canonical_name();
        if canonical != name {
            let alias = self.state.inodes().insert(NodeKind::Alias {
                canonical: canonical.clone(),
            });
            cache.aliases.insert(name.to_string(), Arc::clone(&alias));
            self.state.policy().record_insert("aliases", cache.aliases.len());
            debug!(name, canonical, "alias for canonical folder name");
            return Ok(alias);
        }

        let resolved = match ops
            .get_or_create_root_node(ctx, &handle, &BranchName::master())
            .await
        {
            Ok(resolved) => Some(resolved),
            Err(e) if e.is_read_access_denied() && handle.has_public() => {
                debug!(name, "no read access, exposing public subtree only");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let folder_branch = resolved
            .as_ref()
            .map_or_else(FolderBranch::unresolved, |(node, _)| {
                node.folder_branch().clone()
            });
        let folder = Folder::open(&self.state, handle.clone(), folder_branch)?;
        let wrapper = match resolved {
            Some((node, info)) => folder.get_or_create(node, &info),
            None => folder.unresolved_root(),
        };
        cache.folders.insert(name.to_string(), Arc::clone(&wrapper));
        self.state.policy().record_insert("root", cache.folders.len());
        if let Some(dir) = wrapper.as_dir() {
            dir.set_has_public(handle.has_public());
        }
        debug!(name, ino = wrapper.ino(), "resolved folder");
        Ok(wrapper)
    }

    /// Lists the root: one directory per favorite folder.
    pub async fn read_dir(&self, ctx: &RequestContext) -> FsResult<Vec<DirEntry>> {
        list_favorites(self.state.ops(), ctx, self.favorite_workers).await
    }

    /// Cached wrapper for `name`, without resolving.
    pub async fn cached(&self, name: &str) -> Option<Arc<FsNode>> {
        let cache = self.cache.lock().await;
        cache
            .folders
            .get(name)
            .or_else(|| cache.aliases.get(name))
            .cloned()
    }
}
