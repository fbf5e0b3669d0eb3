//! Inode management for the FUSE filesystem.
//!
//! Every wrapper handed to the kernel gets an inode number from this table.
//! Numbers are never reused and entries are never evicted, so an inode stays
//! valid for the life of the mount.

use crate::node::{FsNode, NodeKind};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// Thread-safe table mapping inode numbers to node wrappers.
pub struct InodeTable {
    nodes: DashMap<u64, Arc<FsNode>>,
    next_inode: AtomicU64,
}

impl InodeTable {
    /// Creates an empty table. The root inode is served separately and is
    /// never stored here.
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            next_inode: AtomicU64::new(ROOT_INODE + 1),
        }
    }

    /// Allocates an inode, wraps `kind` in a node carrying it and registers
    /// the node.
    pub fn insert(&self, kind: NodeKind) -> Arc<FsNode> {
        let ino = self.next_inode.fetch_add(1, Ordering::Relaxed);
        let node = Arc::new(FsNode::new(ino, kind));
        self.nodes.insert(ino, Arc::clone(&node));
        node
    }

    /// Looks up a node by inode number.
    pub fn get(&self, ino: u64) -> Option<Arc<FsNode>> {
        self.nodes.get(&ino).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, ino: u64) -> bool {
        self.nodes.contains_key(&ino)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drops every registered node.
    pub fn clear(&self) {
        self.nodes.clear();
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alias(target: &str) -> NodeKind {
        NodeKind::Alias {
            canonical: target.to_string(),
        }
    }

    #[test]
    fn test_new_table_is_empty() {
        let table = InodeTable::new();
        assert!(table.is_empty());
        assert!(table.get(ROOT_INODE).is_none());
    }

    #[test]
    fn test_insert_allocates_after_root() {
        let table = InodeTable::new();
        let a = table.insert(alias("alice"));
        let b = table.insert(alias("bob"));
        assert_eq!(a.ino(), ROOT_INODE + 1);
        assert_eq!(b.ino(), ROOT_INODE + 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_get_returns_same_node() {
        let table = InodeTable::new();
        let a = table.insert(alias("alice"));
        let found = table.get(a.ino()).unwrap();
        assert!(Arc::ptr_eq(&a, &found));
        assert!(table.contains(a.ino()));
        assert!(!table.contains(999));
    }

    #[test]
    fn test_concurrent_inserts_are_unique() {
        use std::collections::HashSet;
        use std::thread;

        let table = Arc::new(InodeTable::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    (0..100)
                        .map(|j| table.insert(alias(&format!("{i}-{j}"))).ino())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for ino in handle.join().unwrap() {
                assert!(seen.insert(ino), "duplicate inode {ino}");
            }
        }
        assert_eq!(table.len(), 800);
    }
}
