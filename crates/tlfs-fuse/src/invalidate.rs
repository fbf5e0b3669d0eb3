//! Kernel cache invalidation.

use std::ffi::OsStr;
use std::io;
use std::sync::{Arc, OnceLock};

/// Pushes invalidations into the kernel's caches.
pub trait KernelInvalidator: Send + Sync {
    /// Drops cached data of `ino` in `[offset, offset + len)`; `len == 0`
    /// means to the end of the file. A negative offset drops only attributes.
    fn inval_inode(&self, ino: u64, offset: i64, len: i64) -> io::Result<()>;

    /// Drops the cached lookup of `name` in directory `parent`.
    fn inval_entry(&self, parent: u64, name: &OsStr) -> io::Result<()>;
}

/// Slot the mount fills with the session's notifier once the session exists.
pub type NotifierSlot = Arc<OnceLock<fuser::Notifier>>;

/// Forwards invalidations to a live FUSE session.
///
/// Before the session is up there is nothing cached to invalidate, so calls
/// succeed without doing anything.
#[derive(Default)]
pub struct SessionInvalidator {
    notifier: NotifierSlot,
}

impl SessionInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot to inject the notifier into after the session is created.
    pub fn slot(&self) -> NotifierSlot {
        Arc::clone(&self.notifier)
    }

    pub fn is_connected(&self) -> bool {
        self.notifier.get().is_some()
    }
}

impl KernelInvalidator for SessionInvalidator {
    fn inval_inode(&self, ino: u64, offset: i64, len: i64) -> io::Result<()> {
        match self.notifier.get() {
            Some(notifier) => notifier.inval_inode(ino, offset, len),
            None => Ok(()),
        }
    }

    fn inval_entry(&self, parent: u64, name: &OsStr) -> io::Result<()> {
        match self.notifier.get() {
            Some(notifier) => notifier.inval_entry(parent, name),
            None => Ok(()),
        }
    }
}
