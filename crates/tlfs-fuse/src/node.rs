//! Node wrappers handed to the kernel.

use crate::dir::Dir;
use crate::error::{FsError, FsResult};
use crate::folder::Folder;
use std::sync::Arc;
use std::time::SystemTime;
use tlfs_core::{EntryInfo, EntryType, Node, RequestContext};

/// One filesystem object the kernel knows by inode number.
pub struct FsNode {
    ino: u64,
    kind: NodeKind,
}

/// What an inode stands for.
pub enum NodeKind {
    /// A requested folder name that is not canonical. Presented as a
    /// symlink to the canonical name.
    Alias { canonical: String },
    /// A directory inside a folder, or a folder root.
    Dir(Dir),
    /// A regular file.
    File(FileNode),
    /// A symlink stored in a folder.
    Symlink { target: String, mtime: SystemTime },
}

impl FsNode {
    pub(crate) fn new(ino: u64, kind: NodeKind) -> Self {
        Self { ino, kind }
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn as_dir(&self) -> Option<&Dir> {
        match &self.kind {
            NodeKind::Dir(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        match &self.kind {
            NodeKind::File(file) => Some(file),
            _ => None,
        }
    }

    /// Canonical name if this is an alias.
    pub fn alias_target(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Alias { canonical } => Some(canonical),
            _ => None,
        }
    }

    /// Link target for aliases and symlinks.
    pub fn link_target(&self) -> FsResult<&str> {
        match &self.kind {
            NodeKind::Alias { canonical } => Ok(canonical),
            NodeKind::Symlink { target, .. } => Ok(target),
            _ => Err(FsError::NotSymlink(self.ino)),
        }
    }

    /// Entry type the kernel sees.
    pub fn entry_type(&self) -> EntryType {
        match &self.kind {
            NodeKind::Alias { .. } | NodeKind::Symlink { .. } => EntryType::Symlink,
            NodeKind::Dir(_) => EntryType::Dir,
            NodeKind::File(file) if file.exec => EntryType::Exec,
            NodeKind::File(_) => EntryType::File,
        }
    }
}

impl std::fmt::Debug for FsNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            NodeKind::Alias { .. } => "alias",
            NodeKind::Dir(_) => "dir",
            NodeKind::File(_) => "file",
            NodeKind::Symlink { .. } => "symlink",
        };
        f.debug_struct("FsNode")
            .field("ino", &self.ino)
            .field("kind", &kind)
            .finish()
    }
}

/// A regular file inside a folder.
pub struct FileNode {
    folder: Arc<Folder>,
    node: Node,
    exec: bool,
}

impl FileNode {
    pub(crate) fn new(folder: Arc<Folder>, node: Node, exec: bool) -> Self {
        Self { folder, node, exec }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn is_exec(&self) -> bool {
        self.exec
    }

    /// Current size and mtime from the backend.
    pub async fn stat(&self, ctx: &RequestContext) -> FsResult<EntryInfo> {
        Ok(self.folder.ops().stat(ctx, &self.node).await?)
    }

    pub async fn read(&self, ctx: &RequestContext, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        Ok(self.folder.ops().read(ctx, &self.node, offset, size).await?)
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryType,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: EntryType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self::new(name, EntryType::Dir)
    }
}
