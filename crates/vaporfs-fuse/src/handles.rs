//! Per-open directory snapshots.
//!
//! `readdir` must present a stable view across the multiple kernel calls
//! that walk one open directory, even while other callers mutate the tree.
//! The adapter captures the listing once at `opendir`, keys it by the
//! returned directory handle, serves `readdir` offsets out of the snapshot,
//! and frees it on `releasedir`.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use vaporfs_core::DirEntry;

/// Table of directory-listing snapshots keyed by open-dir handle.
pub(crate) struct DirHandles {
    snapshots: DashMap<u64, Vec<DirEntry>>,
    next_fh: AtomicU64,
}

impl DirHandles {
    pub(crate) fn new() -> Self {
        Self {
            snapshots: DashMap::new(),
            next_fh: AtomicU64::new(1),
        }
    }

    /// Store a snapshot and return the handle to hand to the kernel.
    pub(crate) fn insert(&self, entries: Vec<DirEntry>) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.snapshots.insert(fh, entries);
        fh
    }

    pub(crate) fn get(&self, fh: u64) -> Option<dashmap::mapref::one::Ref<'_, u64, Vec<DirEntry>>> {
        self.snapshots.get(&fh)
    }

    pub(crate) fn remove(&self, fh: u64) -> Option<Vec<DirEntry>> {
        self.snapshots.remove(&fh).map(|(_, entries)| entries)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.snapshots.len()
    }
}
