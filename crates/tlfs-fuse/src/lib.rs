//! FUSE filesystem for shared top-level folders.
//!
//! Each top-level directory of the mount is a folder named by its members
//! (`alice,bob`, `alice#carol`, ...). Names are resolved through a
//! [`StorageOps`](tlfs_core::StorageOps) backend the first time they are
//! looked up; non-canonical spellings show up as symlinks to the canonical
//! name. Listing the root shows the caller's favorite folders.
//!
//! # Features
//!
//! - Stable inode identity per backend node for the life of the mount
//! - Kernel cache invalidation driven by backend change notifications
//! - Public subtrees exposed as a `public` child of private folders
//! - Timeout-bounded, concurrent request handling on a tokio runtime
//!
//! # Usage
//!
//! ```ignore
//! use tlfs_core::{RequestContext, memory::MemoryOps};
//! use tlfs_fuse::{MountConfig, mount};
//!
//! let ops = Arc::new(MemoryOps::from_manifest(&manifest)?);
//! mount(&RequestContext::background(), ops, MountConfig::default(), mountpoint)?;
//! ```

pub mod async_bridge;
pub mod cache_policy;
pub mod config;
pub mod dir;
pub mod error;
pub mod favorites;
pub mod filesystem;
pub mod folder;
pub mod handles;
pub mod inode;
pub mod invalidate;
pub mod mount;
pub mod node;
pub mod root;
pub mod state;

pub use async_bridge::{BridgeError, BridgeStats};
pub use cache_policy::CapacityPolicy;
pub use config::{FAVORITE_WORKERS, MountConfig};
pub use dir::Dir;
pub use error::{FsError, FsResult, MountError, ToErrno};
pub use favorites::list_favorites;
pub use filesystem::TlfFs;
pub use folder::Folder;
pub use handles::{DirHandleTable, ListingEntry};
pub use inode::{InodeTable, ROOT_INODE};
pub use invalidate::{KernelInvalidator, SessionInvalidator};
pub use mount::{TlfMountHandle, mount, spawn_mount};
pub use node::{DirEntry, FileNode, FsNode, NodeKind};
pub use root::Root;
pub use state::FsState;
