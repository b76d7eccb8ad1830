//! The inode index and top-level orchestrator (§4.1). `Tree` owns all
//! mutable state behind one `tokio::sync::Mutex`, never held across an
//! `.await` (§5) — every public operation locks, does synchronous
//! bookkeeping, drops the lock, awaits a collaborator, then re-locks to
//! apply results.

use crate::collaborators::Backend;
use crate::config::TreeConfig;
use crate::entry::{Entry, EntryKind, InodeId, ROOT_INODE};
use crate::error::{Result, TreeError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// Inode-indexed entry table plus the per-inode single-flight waiter sets.
/// Waiters live outside `Entry` (which stays plain-data/`Clone`) so that a
/// refresh in flight can be observed and awaited without cloning a `Notify`.
#[derive(Default)]
pub struct TreeState {
    pub entries: HashMap<InodeId, Entry>,
    next_ino: InodeId,
    dir_refresh_waiters: HashMap<InodeId, Arc<Notify>>,
    attr_refresh_waiters: HashMap<InodeId, Arc<Notify>>,
}

impl TreeState {
    fn new(dir_mode: u32) -> Self {
        let mut entries = HashMap::new();
        entries.insert(ROOT_INODE, Entry::new_root(dir_mode));
        TreeState {
            entries,
            next_ino: ROOT_INODE + 1,
            dir_refresh_waiters: HashMap::new(),
            attr_refresh_waiters: HashMap::new(),
        }
    }

    /// Allocates the next inode number. Monotonically increasing for the
    /// lifetime of the tree (§8 invariant: inode numbers are never reused).
    pub fn alloc_inode(&mut self) -> InodeId {
        let ino = self.next_ino;
        self.next_ino += 1;
        ino
    }

    pub fn get(&self, ino: InodeId) -> Result<&Entry> {
        self.entries.get(&ino).ok_or(TreeError::NotFound { ino })
    }

    pub fn get_mut(&mut self, ino: InodeId) -> Result<&mut Entry> {
        self.entries.get_mut(&ino).ok_or(TreeError::NotFound { ino })
    }

    pub fn dir_refresh_notify(&mut self, ino: InodeId) -> Arc<Notify> {
        self.dir_refresh_waiters
            .entry(ino)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    pub fn attr_refresh_notify(&mut self, ino: InodeId) -> Arc<Notify> {
        self.attr_refresh_waiters
            .entry(ino)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }
}

/// Summary counts returned by [`Tree::stats`] (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub inode_count: usize,
    pub file_count: usize,
    pub dir_count: usize,
}

/// Top-level directory-tree cache. Generic over nothing: the backend is
/// type-erased behind `Arc<dyn Backend>` so a tree can be constructed once
/// at startup and shared across every kernel-adapter callback.
pub struct Tree {
    pub(crate) state: Mutex<TreeState>,
    pub(crate) config: TreeConfig,
    pub(crate) backend: Arc<dyn Backend>,
}

impl Tree {
    pub fn new(config: TreeConfig, backend: Arc<dyn Backend>) -> Self {
        let dir_mode = config.dir_mode;
        Tree {
            state: Mutex::new(TreeState::new(dir_mode)),
            config,
            backend,
        }
    }

    /// Walks the inode index once and reports counts (§4.10, grounded on
    /// `dir_tree_get_stats`/`dir_tree_get_inode_count`).
    pub async fn stats(&self) -> TreeStats {
        let state = self.state.lock().await;
        let mut files = 0usize;
        let mut dirs = 0usize;
        for entry in state.entries.values() {
            match entry.kind {
                EntryKind::Directory => dirs += 1,
                EntryKind::File => files += 1,
            }
        }
        TreeStats {
            inode_count: state.entries.len(),
            file_count: files,
            dir_count: dirs,
        }
    }

    /// Clones the current entry for `ino`, for callers (attribute getters,
    /// xattr reads) that only need a point-in-time snapshot.
    pub async fn entry_snapshot(&self, ino: InodeId) -> Result<Entry> {
        let state = self.state.lock().await;
        state.get(ino).cloned()
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Tree {
    /// Mutates `ino`'s entry in place. Only available to integration tests,
    /// which otherwise have no way to reach behind the tree's single mutex.
    pub async fn test_mutate_entry<F: FnOnce(&mut Entry)>(&self, ino: InodeId, f: F) -> Result<()> {
        let mut state = self.state.lock().await;
        f(state.get_mut(ino)?);
        Ok(())
    }

    /// Snapshots every entry currently in the inode index. Only available to
    /// integration tests checking tree-wide invariants (§8), which otherwise
    /// have no way to reach behind the tree's single mutex.
    pub async fn test_all_entries(&self) -> Vec<Entry> {
        let state = self.state.lock().await;
        state.entries.values().cloned().collect()
    }
}
