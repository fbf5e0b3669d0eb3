//! Error handling and mapping for the FUSE filesystem.
//!
//! Backend errors pass through to the kernel unchanged in kind; this module
//! only decides which POSIX error code each kind becomes.

use crate::async_bridge::BridgeError;
use std::io;
use thiserror::Error;
use tlfs_core::OpsError;

/// Errors that can occur while serving a filesystem request.
#[derive(Debug, Error)]
pub enum FsError {
    /// Storage backend error.
    #[error("backend operation failed: {0}")]
    Ops(#[from] OpsError),

    /// Async bridge error (timeout, cancelled).
    #[error("async bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// A name that does not resolve to anything (unparsable folder name,
    /// public name at the root, or a name inside an unreadable folder).
    #[error("no such entry: {0}")]
    NotFound(String),

    /// The entry name is not valid UTF-8.
    #[error("invalid entry name")]
    InvalidName,

    /// Invalid inode.
    #[error("invalid inode: {0}")]
    InvalidInode(u64),

    /// Invalid directory handle.
    #[error("invalid handle: {0}")]
    InvalidHandle(u64),

    /// Directory operation on a non-directory.
    #[error("not a directory: inode {0}")]
    NotDirectory(u64),

    /// File operation on a directory.
    #[error("is a directory: inode {0}")]
    IsDirectory(u64),

    /// readlink on something that is not a link.
    #[error("not a symlink: inode {0}")]
    NotSymlink(u64),

    /// The mount only serves reads.
    #[error("read-only filesystem")]
    ReadOnly,

    /// A background task ended without reporting a result.
    #[error("worker task failed: {0}")]
    Worker(String),

    /// The mount is shutting down or the request was abandoned.
    #[error("request cancelled")]
    Cancelled,
}

impl FsError {
    /// Converts this error to a libc error code for FUSE.
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::Ops(e) => e.to_errno(),
            FsError::Bridge(e) => e.to_errno(),
            FsError::NotFound(_) | FsError::InvalidInode(_) => libc::ENOENT,
            FsError::InvalidName => libc::EINVAL,
            FsError::InvalidHandle(_) => libc::EBADF,
            FsError::NotDirectory(_) => libc::ENOTDIR,
            FsError::IsDirectory(_) => libc::EISDIR,
            FsError::NotSymlink(_) => libc::EINVAL,
            FsError::ReadOnly => libc::EROFS,
            FsError::Worker(_) => libc::EIO,
            FsError::Cancelled => libc::ECANCELED,
        }
    }

    /// True when the error means the caller's request was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            FsError::Cancelled | FsError::Ops(OpsError::Cancelled) | FsError::Bridge(BridgeError::Cancelled)
        )
    }
}

/// Result type for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// Extension trait to convert errors to errno.
pub trait ToErrno {
    /// Converts this error to a libc error code.
    fn to_errno(&self) -> i32;
}

impl ToErrno for OpsError {
    fn to_errno(&self) -> i32 {
        match self {
            OpsError::ReadAccessDenied { .. } => libc::EACCES,
            OpsError::NoSuchFolder(_)
            | OpsError::NoSuchFolderName(_)
            | OpsError::NoSuchName(_)
            | OpsError::UnknownNode(_)
            | OpsError::Handle(_) => libc::ENOENT,
            OpsError::NotDirectory(_) => libc::ENOTDIR,
            OpsError::NotFile(_) => libc::EISDIR,
            OpsError::Cancelled => libc::ECANCELED,
            OpsError::Registration(_) | OpsError::Unavailable(_) => libc::EIO,
        }
    }
}

impl ToErrno for io::Error {
    fn to_errno(&self) -> i32 {
        self.raw_os_error().unwrap_or(libc::EIO)
    }
}

/// Errors from establishing or serving a mount.
#[derive(Debug, Error)]
pub enum MountError {
    /// The mount handshake with the kernel failed.
    #[error("failed to mount: {0}")]
    Mount(#[source] io::Error),

    /// The serve loop stopped with an error.
    #[error("filesystem session failed: {0}")]
    Serve(#[source] io::Error),

    /// The async runtime could not be created.
    #[error("failed to create runtime: {0}")]
    Runtime(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tlfs_core::{FolderId, HandleError, NodeId};

    #[test]
    fn test_ops_error_mapping() {
        let denied = OpsError::ReadAccessDenied {
            user: "eve".to_string(),
            folder: "alice".to_string(),
        };
        assert_eq!(denied.to_errno(), libc::EACCES);
        assert_eq!(OpsError::NoSuchFolder(FolderId::new(3)).to_errno(), libc::ENOENT);
        assert_eq!(OpsError::NoSuchName("x".to_string()).to_errno(), libc::ENOENT);
        assert_eq!(OpsError::NotDirectory(NodeId::new(1)).to_errno(), libc::ENOTDIR);
        assert_eq!(OpsError::NotFile(NodeId::new(1)).to_errno(), libc::EISDIR);
        assert_eq!(OpsError::Unavailable("down".to_string()).to_errno(), libc::EIO);
        assert_eq!(OpsError::Cancelled.to_errno(), libc::ECANCELED);
        let parse: OpsError = HandleError::NoWriters { name: String::new() }.into();
        assert_eq!(parse.to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_fs_error_all_variants() {
        assert_eq!(FsError::NotFound("a@public".to_string()).to_errno(), libc::ENOENT);
        assert_eq!(FsError::InvalidName.to_errno(), libc::EINVAL);
        assert_eq!(FsError::InvalidInode(9).to_errno(), libc::ENOENT);
        assert_eq!(FsError::InvalidHandle(9).to_errno(), libc::EBADF);
        assert_eq!(FsError::NotDirectory(9).to_errno(), libc::ENOTDIR);
        assert_eq!(FsError::IsDirectory(9).to_errno(), libc::EISDIR);
        assert_eq!(FsError::NotSymlink(9).to_errno(), libc::EINVAL);
        assert_eq!(FsError::ReadOnly.to_errno(), libc::EROFS);
        assert_eq!(FsError::Cancelled.to_errno(), libc::ECANCELED);
        assert_eq!(FsError::Worker("panicked".to_string()).to_errno(), libc::EIO);
        assert_eq!(
            FsError::Bridge(BridgeError::Cancelled).to_errno(),
            libc::ECANCELED
        );
        assert!(FsError::Bridge(BridgeError::Cancelled).is_cancelled());
        assert_eq!(
            FsError::Bridge(BridgeError::Timeout(Duration::from_secs(1))).to_errno(),
            libc::ETIMEDOUT
        );
    }

    #[test]
    fn test_ops_error_passes_through() {
        let e: FsError = OpsError::Unavailable("offline".to_string()).into();
        assert_eq!(e.to_errno(), libc::EIO);
        assert!(e.to_string().contains("offline"));
    }

    #[test]
    fn test_is_cancelled() {
        assert!(FsError::Cancelled.is_cancelled());
        assert!(FsError::Ops(OpsError::Cancelled).is_cancelled());
        assert!(!FsError::NotFound("x".to_string()).is_cancelled());
    }

    #[test]
    fn test_io_error_to_errno() {
        assert_eq!(io::Error::from_raw_os_error(libc::EPERM).to_errno(), libc::EPERM);
        assert_eq!(io::Error::other("custom").to_errno(), libc::EIO);
    }
}
