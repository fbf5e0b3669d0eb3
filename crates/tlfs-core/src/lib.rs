//! Core types for the tlfs folder adapter.
//!
//! This crate holds everything the FUSE adapter shares with a storage
//! backend:
//!
//! - [`FolderHandle`]: parsing and canonicalization of folder names
//! - [`StorageOps`] and [`Observer`]: the backend interface
//! - [`RequestContext`]: cooperative cancellation for backend calls
//! - [`OpsError`]: the backend error taxonomy
//!
//! With the `memory` feature (on by default), [`memory::MemoryOps`] provides a
//! complete in-memory backend.

pub mod context;
pub mod error;
pub mod handle;
#[cfg(feature = "memory")]
pub mod memory;
pub mod ops;
pub mod types;

pub use context::{CancelHandle, RequestContext};
pub use error::{HandleError, OpsError, OpsResult};
pub use handle::{DefaultMembers, FolderHandle, MemberResolver, PUBLIC_DIR_NAME};
pub use ops::{Observer, StorageOps};
pub use types::{
    BranchName, EntryInfo, EntryType, FolderBranch, FolderId, Node, NodeChange, NodeId,
    WriteRange,
};
