//! Identifiers and metadata exchanged with the storage backend.

use std::fmt;
use std::time::SystemTime;

/// Stable backend identifier for a folder, independent of its display name.
///
/// Two handles that name the same underlying folder resolve to the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FolderId(u64);

impl FolderId {
    /// Placeholder for a folder whose root could not be fetched.
    pub const NULL: FolderId = FolderId(0);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Name of one line of history within a folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchName(String);

impl BranchName {
    const MASTER: &'static str = "master";

    /// The canonical line every folder starts with.
    pub fn master() -> Self {
        Self(Self::MASTER.to_string())
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_master(&self) -> bool {
        self.0 == Self::MASTER
    }
}

impl Default for BranchName {
    fn default() -> Self {
        Self::master()
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A (folder, branch) pair identifying one revision line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderBranch {
    pub folder: FolderId,
    pub branch: BranchName,
}

impl FolderBranch {
    pub fn new(folder: FolderId, branch: BranchName) -> Self {
        Self { folder, branch }
    }

    /// The master line of `folder`.
    pub fn master(folder: FolderId) -> Self {
        Self::new(folder, BranchName::master())
    }

    /// Revision line used for folders that have no readable root.
    pub fn unresolved() -> Self {
        Self::master(FolderId::NULL)
    }
}

impl fmt::Display for FolderBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.folder, self.branch)
    }
}

/// Backend-assigned identity of one filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

/// Opaque reference to a backend object at a point in a revision line.
///
/// The adapter never looks inside a node beyond its identity and the
/// revision line it belongs to; everything else is the backend's business.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    id: NodeId,
    folder_branch: FolderBranch,
}

impl Node {
    pub fn new(id: NodeId, folder_branch: FolderBranch) -> Self {
        Self { id, folder_branch }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn folder_branch(&self) -> &FolderBranch {
        &self.folder_branch
    }
}

/// Kind of a directory entry as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    File,
    /// Regular file with the executable bit set.
    Exec,
    Dir,
    Symlink,
}

impl EntryType {
    pub fn is_dir(self) -> bool {
        matches!(self, EntryType::Dir)
    }

    pub fn is_file(self) -> bool {
        matches!(self, EntryType::File | EntryType::Exec)
    }
}

/// Metadata for one backend entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub kind: EntryType,
    pub size: u64,
    pub mtime: SystemTime,
    /// Link target, only set for [`EntryType::Symlink`].
    pub symlink_target: Option<String>,
}

impl EntryInfo {
    pub fn dir(mtime: SystemTime) -> Self {
        Self {
            kind: EntryType::Dir,
            size: 0,
            mtime,
            symlink_target: None,
        }
    }

    pub fn file(size: u64, mtime: SystemTime) -> Self {
        Self {
            kind: EntryType::File,
            size,
            mtime,
            symlink_target: None,
        }
    }

    pub fn symlink(target: impl Into<String>, mtime: SystemTime) -> Self {
        let target = target.into();
        Self {
            kind: EntryType::Symlink,
            size: target.len() as u64,
            mtime,
            symlink_target: Some(target),
        }
    }
}

/// A byte range written to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRange {
    pub offset: u64,
    /// Zero means "to the end of the file" (truncate-style changes).
    pub len: u64,
}

/// One change to a node, delivered to observers after it is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeChange {
    pub node: Node,
    /// Names of directory entries that were added, removed or replaced.
    pub dir_updated: Vec<String>,
    /// Data ranges that changed.
    pub file_updated: Vec<WriteRange>,
}
