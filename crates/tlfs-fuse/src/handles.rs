//! Open directory handles.
//!
//! `opendir` takes a snapshot of the listing; `readdir` pages through that
//! snapshot by index, so a listing stays consistent across the several
//! `readdir` calls the kernel makes for one directory stream.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tlfs_core::EntryType;

/// One entry of a directory snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub ino: u64,
    pub kind: EntryType,
    pub name: String,
}

/// Snapshot of a directory listing, in the order it is served.
pub type Listing = Arc<Vec<ListingEntry>>;

/// Thread-safe table of open directory handles with auto-incrementing ids.
pub struct DirHandleTable {
    handles: DashMap<u64, Listing>,
    next_id: AtomicU64,
}

impl DirHandleTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Stores `entries` under a fresh handle id.
    pub fn insert_auto(&self, entries: Vec<ListingEntry>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(id, Arc::new(entries));
        id
    }

    pub fn get(&self, fh: u64) -> Option<Listing> {
        self.handles.get(&fh).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, fh: u64) -> Option<Listing> {
        self.handles.remove(&fh).map(|(_, listing)| listing)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn clear(&self) {
        self.handles.clear();
    }
}

impl Default for DirHandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> ListingEntry {
        ListingEntry {
            ino: 2,
            kind: EntryType::Dir,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_insert_get_remove() {
        let table = DirHandleTable::new();
        let fh = table.insert_auto(vec![entry("alice")]);
        assert_eq!(table.get(fh).unwrap()[0].name, "alice");
        assert_eq!(table.len(), 1);
        assert!(table.remove(fh).is_some());
        assert!(table.get(fh).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let table = DirHandleTable::new();
        let a = table.insert_auto(Vec::new());
        let b = table.insert_auto(Vec::new());
        assert_ne!(a, b);
        assert_ne!(a, 0);
    }
}
