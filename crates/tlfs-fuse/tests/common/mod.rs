//! Shared fixtures for the adapter tests.
//!
//! Builds an [`FsState`] over a [`MemoryOps`] backend with a recording
//! invalidator, so resolution and invalidation can be checked without a
//! kernel mount.

// Not every test file uses every helper
#![allow(dead_code)]

use parking_lot::Mutex;
use std::ffi::OsStr;
use std::io;
use std::sync::Arc;
use tlfs_core::StorageOps;
use tlfs_core::memory::MemoryOps;
use tlfs_fuse::{
    CapacityPolicy, Dir, FAVORITE_WORKERS, FsNode, FsState, KernelInvalidator, Root,
};

/// One invalidation pushed to the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    Inode { ino: u64, offset: i64, len: i64 },
    Entry { parent: u64, name: String },
}

/// Invalidator that records instead of talking to a kernel.
#[derive(Default)]
pub struct RecordingInvalidator {
    events: Mutex<Vec<Invalidation>>,
}

impl RecordingInvalidator {
    pub fn take(&self) -> Vec<Invalidation> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl KernelInvalidator for RecordingInvalidator {
    fn inval_inode(&self, ino: u64, offset: i64, len: i64) -> io::Result<()> {
        self.events
            .lock()
            .push(Invalidation::Inode { ino, offset, len });
        Ok(())
    }

    fn inval_entry(&self, parent: u64, name: &OsStr) -> io::Result<()> {
        self.events.lock().push(Invalidation::Entry {
            parent,
            name: name.to_string_lossy().into_owned(),
        });
        Ok(())
    }
}

/// A backend plus the adapter state built on it.
pub struct Fixture {
    pub ops: Arc<MemoryOps>,
    pub state: Arc<FsState>,
    pub invalidations: Arc<RecordingInvalidator>,
}

impl Fixture {
    /// Empty backend acting as `user`.
    pub fn new(user: &str) -> Self {
        Self::with_ops(MemoryOps::new(user))
    }

    pub fn with_ops(ops: MemoryOps) -> Self {
        let ops = Arc::new(ops);
        let invalidations = Arc::new(RecordingInvalidator::default());
        let state = FsState::new(
            Arc::clone(&ops) as Arc<dyn StorageOps>,
            Arc::clone(&invalidations) as Arc<dyn KernelInvalidator>,
            CapacityPolicy::Unbounded,
        );
        Self {
            ops,
            state,
            invalidations,
        }
    }

    /// A fresh root resolver over this fixture's state.
    pub fn root(&self) -> Root {
        Root::new(Arc::clone(&self.state), FAVORITE_WORKERS)
    }

    pub fn dyn_ops(&self) -> Arc<dyn StorageOps> {
        Arc::clone(&self.ops) as Arc<dyn StorageOps>
    }
}

/// The directory behind `node`; panics for anything else.
pub fn as_dir(node: &FsNode) -> &Dir {
    node.as_dir()
        .unwrap_or_else(|| panic!("expected a directory, got {node:?}"))
}

/// Sorted entry names.
pub fn names(entries: &[tlfs_fuse::DirEntry]) -> Vec<String> {
    let mut names: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();
    names.sort();
    names
}
