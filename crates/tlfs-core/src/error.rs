//! Error types for folder-name parsing and storage operations.

use crate::types::{FolderBranch, FolderId, NodeId};
use thiserror::Error;

/// Errors produced while parsing a folder name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    /// The name has no writers (e.g. an empty string or a leading `#`).
    #[error("folder name {name:?} has no writers")]
    NoWriters { name: String },

    /// A member assertion could not be resolved to an identity.
    #[error("invalid member {member:?} in folder name {name:?}")]
    InvalidMember { name: String, member: String },

    /// A public folder was given an explicit reader list.
    #[error("public folder name {name:?} cannot list readers")]
    PublicWithReaders { name: String },
}

/// Errors returned by a [`StorageOps`](crate::StorageOps) implementation.
///
/// `ReadAccessDenied` is singled out because the resolver recovers from it
/// for folders that expose a public subtree; everything else is surfaced to
/// the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpsError {
    /// The caller may not read the folder's metadata.
    #[error("{user} does not have read access to {folder}")]
    ReadAccessDenied { user: String, folder: String },

    /// No folder with the given id exists.
    #[error("no such folder: {0}")]
    NoSuchFolder(FolderId),

    /// No folder with the given name exists and it cannot be created.
    #[error("no such folder name: {0}")]
    NoSuchFolderName(String),

    /// The directory has no entry with the given name.
    #[error("no such name: {0}")]
    NoSuchName(String),

    /// The node is not a directory.
    #[error("not a directory: {0}")]
    NotDirectory(NodeId),

    /// The node is not a regular file.
    #[error("not a file: {0}")]
    NotFile(NodeId),

    /// The node id is unknown to the backend.
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// Registering an observer failed.
    #[error("cannot register for changes on {0}")]
    Registration(FolderBranch),

    /// The folder name could not be parsed.
    #[error(transparent)]
    Handle(#[from] HandleError),

    /// The backend could not be reached or failed internally.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The request context was cancelled before the operation completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl OpsError {
    /// True for the error kind that drives the public-subtree fallback.
    pub fn is_read_access_denied(&self) -> bool {
        matches!(self, OpsError::ReadAccessDenied { .. })
    }
}

/// Result type for storage operations.
pub type OpsResult<T> = Result<T, OpsError>;
