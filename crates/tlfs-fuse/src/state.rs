//! State shared by every folder of one mount.

use crate::cache_policy::CapacityPolicy;
use crate::folder::Folder;
use crate::inode::InodeTable;
use crate::invalidate::KernelInvalidator;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;
use tlfs_core::StorageOps;

/// Backend, inode table and invalidator for one mount.
pub struct FsState {
    ops: Arc<dyn StorageOps>,
    inodes: InodeTable,
    invalidator: Arc<dyn KernelInvalidator>,
    policy: CapacityPolicy,
    mount_time: SystemTime,
    folders: Mutex<Vec<Arc<Folder>>>,
}

impl FsState {
    pub fn new(
        ops: Arc<dyn StorageOps>,
        invalidator: Arc<dyn KernelInvalidator>,
        policy: CapacityPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            ops,
            inodes: InodeTable::new(),
            invalidator,
            policy,
            mount_time: SystemTime::now(),
            folders: Mutex::new(Vec::new()),
        })
    }

    pub fn ops(&self) -> &Arc<dyn StorageOps> {
        &self.ops
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    pub fn invalidator(&self) -> &dyn KernelInvalidator {
        self.invalidator.as_ref()
    }

    pub fn policy(&self) -> CapacityPolicy {
        self.policy
    }

    /// Timestamp for objects with no backend mtime.
    pub fn mount_time(&self) -> SystemTime {
        self.mount_time
    }

    /// Number of folders created so far.
    pub fn folder_count(&self) -> usize {
        self.folders.lock().len()
    }

    pub(crate) fn track(&self, folder: Arc<Folder>) {
        let mut folders = self.folders.lock();
        folders.push(folder);
        self.policy.record_insert("folders", folders.len());
    }

    /// Drops every cached wrapper. Wrappers point back at their folder, so
    /// the caches are only released here.
    pub fn shutdown(&self) {
        let folders = std::mem::take(&mut *self.folders.lock());
        for folder in &folders {
            folder.clear();
        }
        self.inodes.clear();
    }
}
