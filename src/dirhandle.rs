//! Per-open-directory handles (§4.3): `opendir` allocates a handle against
//! `ino` with no buffer yet populated; `readdir` pairs it with a snapshot of
//! the directory's buffer on first call, and subsequent reads on the same
//! handle must see byte-identical content regardless of concurrent refreshes
//! elsewhere in the tree (§8 invariant 5). Handles are looked up far more
//! often than they are opened/closed, so the table is a `DashMap` rather
//! than a field behind the tree's single mutex.

use crate::directory;
use crate::entry::{DirBufEntry, EntryKind, InodeId};
use crate::error::{Result, TreeError};
use crate::tree::Tree;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct DirHandle {
    pub ino: InodeId,
    pub buffer: Option<Vec<u8>>,
}

/// Open-directory-handle table, keyed by the opaque file handle a kernel
/// adapter would pass back on every subsequent `readdir`/`releasedir`.
pub struct DirHandleTable {
    handles: DashMap<u64, DirHandle>,
    next_fh: AtomicU64,
}

impl DirHandleTable {
    pub fn new() -> Self {
        DirHandleTable {
            handles: DashMap::new(),
            next_fh: AtomicU64::new(1),
        }
    }

    /// Allocates a handle against `ino` with no buffer populated yet.
    pub fn open(&self, ino: InodeId) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(fh, DirHandle { ino, buffer: None });
        fh
    }

    fn ino_of(&self, fh: u64) -> Option<InodeId> {
        self.handles.get(&fh).map(|h| h.ino)
    }

    /// Returns the buffer bytes pinned to `fh`, if one has been populated.
    /// Unaffected by any refresh of the underlying directory that happens
    /// after it was first populated.
    pub fn buffer(&self, fh: u64) -> Option<Vec<u8>> {
        self.handles.get(&fh).and_then(|h| h.buffer.clone())
    }

    fn set_buffer(&self, fh: u64, buffer: Vec<u8>) {
        if let Some(mut handle) = self.handles.get_mut(&fh) {
            handle.buffer = Some(buffer);
        }
    }

    pub fn release(&self, fh: u64) -> bool {
        self.handles.remove(&fh).is_some()
    }
}

impl Default for DirHandleTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Opens `ino` for `readdir` (§6.1 `opendir`), returning an opaque handle
/// number. The handle carries no buffer until the first `readdir` call.
pub async fn opendir(tree: &Tree, table: &DirHandleTable, ino: InodeId) -> Result<u64> {
    let entry = tree.entry_snapshot(ino).await?;
    if entry.kind != EntryKind::Directory {
        return Err(TreeError::NotADirectory { ino });
    }
    Ok(table.open(ino))
}

fn synthesize_from_children(state: &crate::tree::TreeState, dir_ino: InodeId) -> Result<Vec<u8>> {
    let dir_entry = state.get(dir_ino)?;
    let mut buf_entries = Vec::new();
    if let Some(children) = dir_entry.children.as_ref() {
        for (name, ino) in children {
            if let Ok(child) = state.get(*ino) {
                if child.removed {
                    continue;
                }
                buf_entries.push(DirBufEntry {
                    name: name.clone(),
                    ino: *ino,
                    kind: child.kind,
                });
            }
        }
    }
    Ok(crate::entry::format_dir_buffer(dir_ino, &buf_entries))
}

/// Reads `fh`'s directory buffer at `offset` (§4.2 tail, §4.3).
///
/// If the handle already holds a buffer, it is returned unchanged regardless
/// of `offset` or any refresh that has happened since — a handle's buffer
/// contents must stay byte-identical for its whole lifetime. Otherwise:
/// `offset > 0` with no buffer yet populated fails (there is nothing to
/// continue from); at `offset == 0` the buffer is populated from whichever
/// of three sources applies — a refresh already in flight is never waited
/// on, instead the buffer is synthesized from the directory's current
/// children; a fresh (not expired) cache is returned directly; otherwise a
/// real refresh is dispatched and its result used.
pub async fn readdir(tree: &Tree, table: &DirHandleTable, fh: u64, offset: u64) -> Result<Vec<u8>> {
    let dir_ino = table.ino_of(fh).ok_or(TreeError::NoHandleBuffer { fh })?;

    if let Some(buffer) = table.buffer(fh) {
        return Ok(buffer);
    }
    if offset > 0 {
        return Err(TreeError::NoHandleBuffer { fh });
    }

    let buffer = {
        let state = tree.state.lock().await;
        let entry = state.get(dir_ino)?;
        if entry.kind != EntryKind::Directory {
            return Err(TreeError::NotADirectory { ino: dir_ino });
        }
        if entry.dir_cache_updating {
            Some(synthesize_from_children(&state, dir_ino)?)
        } else if !directory::is_dir_cache_expired(entry, tree.config.dir_cache_max_time) {
            Some(entry.dir_cache.clone().unwrap_or_default())
        } else {
            None
        }
    };

    let buffer = match buffer {
        Some(buffer) => buffer,
        None => {
            directory::ensure_fresh(tree, dir_ino).await?;
            tree.entry_snapshot(dir_ino).await?.dir_cache.unwrap_or_default()
        }
    };

    table.set_buffer(fh, buffer.clone());
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ListedEntry;
    use crate::config::TreeConfig;
    use crate::entry::ROOT_INODE;
    use crate::mock::MockBackend;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    fn listing_of(names: &[&str]) -> Vec<ListedEntry> {
        names
            .iter()
            .map(|n| ListedEntry {
                basename: n.to_string(),
                size: 0,
                last_modified: SystemTime::now(),
                is_prefix: false,
            })
            .collect()
    }

    #[test]
    fn release_removes_the_handle() {
        let table = DirHandleTable::new();
        let fh = table.open(5);
        assert!(table.release(fh));
        assert_eq!(table.buffer(fh), None);
    }

    #[test]
    fn handles_are_assigned_distinct_numbers() {
        let table = DirHandleTable::new();
        let a = table.open(1);
        let b = table.open(1);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn readdir_at_offset_zero_populates_the_buffer_from_a_fresh_cache() {
        let backend = Arc::new(MockBackend::new());
        backend.set_listing("", listing_of(&["a.txt"])).await;
        let tree = Tree::new(TreeConfig::default(), backend);
        directory::ensure_fresh(&tree, ROOT_INODE).await.unwrap();

        let table = DirHandleTable::new();
        let fh = opendir(&tree, &table, ROOT_INODE).await.unwrap();
        let buffer = readdir(&tree, &table, fh, 0).await.unwrap();
        assert!(!buffer.is_empty());
        assert_eq!(table.buffer(fh), Some(buffer));
    }

    #[tokio::test]
    async fn readdir_continuation_at_nonzero_offset_without_a_buffer_fails() {
        let backend = Arc::new(MockBackend::new());
        let tree = Tree::new(TreeConfig::default(), backend);
        let table = DirHandleTable::new();
        let fh = opendir(&tree, &table, ROOT_INODE).await.unwrap();
        let err = readdir(&tree, &table, fh, 1).await.unwrap_err();
        assert!(matches!(err, TreeError::NoHandleBuffer { .. }));
    }

    #[tokio::test]
    async fn readdir_buffer_stays_byte_identical_across_a_concurrent_refresh() {
        let backend = Arc::new(MockBackend::new());
        backend.set_listing("", listing_of(&["a.txt"])).await;
        let tree = Tree::new(TreeConfig::default(), backend.clone());
        directory::ensure_fresh(&tree, ROOT_INODE).await.unwrap();

        let table = DirHandleTable::new();
        let fh = opendir(&tree, &table, ROOT_INODE).await.unwrap();
        let first_read = readdir(&tree, &table, fh, 0).await.unwrap();

        backend.set_listing("", vec![]).await;
        tree.test_mutate_entry(ROOT_INODE, |e| {
            e.dir_cache_created = Some(SystemTime::now() - Duration::from_secs(3600));
        })
        .await
        .unwrap();
        directory::ensure_fresh(&tree, ROOT_INODE).await.unwrap();

        let second_read = readdir(&tree, &table, fh, 1).await.unwrap();
        assert_eq!(first_read, second_read, "handle buffer must stay byte-identical for its lifetime");
    }

    #[tokio::test]
    async fn readdir_while_a_refresh_is_in_flight_synthesizes_from_current_children() {
        let backend = Arc::new(MockBackend::new());
        backend.set_listing("", listing_of(&["a.txt"])).await;
        let tree = Tree::new(TreeConfig::default(), backend);
        directory::ensure_fresh(&tree, ROOT_INODE).await.unwrap();
        tree.test_mutate_entry(ROOT_INODE, |e| e.dir_cache_updating = true)
            .await
            .unwrap();

        let table = DirHandleTable::new();
        let fh = opendir(&tree, &table, ROOT_INODE).await.unwrap();
        let buffer = readdir(&tree, &table, fh, 0).await.unwrap();
        assert!(!buffer.is_empty());
    }

    #[tokio::test]
    async fn opendir_on_a_file_fails() {
        let backend = Arc::new(MockBackend::new());
        let tree = Tree::new(TreeConfig::default(), backend);
        let ino = crate::fileops::create(&tree, ROOT_INODE, "a.txt").await.unwrap();
        let table = DirHandleTable::new();
        let err = opendir(&tree, &table, ino).await.unwrap_err();
        assert!(matches!(err, TreeError::NotADirectory { .. }));
    }
}
