//! Create, open, read, write, and release for regular files (§4.5). Open
//! file handles are kept in a `DashMap` keyed by an opaque file-handle
//! number, mirroring the directory-handle table in `dirhandle.rs` and
//! giving the teacher's previously-unused `dashmap` dependency its other
//! genuine call site.

use crate::collaborators::FileIoHandle;
use crate::entry::{Entry, EntryKind, InodeId};
use crate::error::{Result, TreeError};
use crate::tree::Tree;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::debug;

struct OpenFile {
    ino: InodeId,
    path: String,
    handle: Box<dyn FileIoHandle>,
}

/// Open-file-handle table (§4.5/§6.4). One `OpenFile` per outstanding
/// `open`/`create`; released on `release`.
pub struct FileHandleTable {
    handles: DashMap<u64, OpenFile>,
    next_fh: AtomicU64,
}

impl FileHandleTable {
    pub fn new() -> Self {
        FileHandleTable {
            handles: DashMap::new(),
            next_fh: AtomicU64::new(1),
        }
    }
}

impl Default for FileHandleTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates a new zero-length file under `parent`, visible in the parent's
/// listing immediately (it carries the parent's current generation so the
/// next sweep does not tombstone it before the backend has observed it). A
/// same-basename child that already exists is refused only if it is a
/// different type (§4.1); a same-type child is reused in place — its
/// `removed` flag is cleared and its `access_time`/`age` refreshed — rather
/// than treated as a conflict (§4.5).
pub async fn create(tree: &Tree, parent: InodeId, name: &str) -> Result<InodeId> {
    let mut state = tree.state.lock().await;
    let parent_entry = state.get(parent)?;
    if parent_entry.kind != EntryKind::Directory {
        return Err(TreeError::NotADirectory { ino: parent });
    }
    let existing = parent_entry.children.as_ref().and_then(|c| c.get(name)).copied();
    let parent_age = parent_entry.age;

    if let Some(ino) = existing {
        if state.get(ino)?.kind != EntryKind::File {
            return Err(TreeError::TypeMismatch {
                parent,
                name: name.to_string(),
            });
        }
        let entry = state.get_mut(ino)?;
        entry.removed = false;
        entry.access_time = SystemTime::now();
        entry.age = parent_age;
        entry.is_modified = true;
        debug!(parent, name, ino, "tree: create reused existing entry");
        return Ok(ino);
    }

    let fullpath = state.get(parent)?.child_fullpath(name);
    let ino = state.alloc_inode();
    let mut entry = Entry::new_root(tree.config.file_mode);
    entry.ino = ino;
    entry.parent = parent;
    entry.basename = name.to_string();
    entry.fullpath = fullpath;
    entry.kind = EntryKind::File;
    entry.children = None;
    entry.is_modified = true;
    entry.age = parent_age;
    state.entries.insert(ino, entry);
    state
        .get_mut(parent)?
        .children
        .get_or_insert_with(Default::default)
        .insert(name.to_string(), ino);
    debug!(parent, name, ino, "tree: file created");
    Ok(ino)
}

/// Opens `ino` for I/O, handing back an opaque file handle number.
pub async fn open(tree: &Tree, table: &FileHandleTable, ino: InodeId) -> Result<u64> {
    let path = {
        let state = tree.state.lock().await;
        let entry = state.get(ino)?;
        if entry.kind != EntryKind::File {
            return Err(TreeError::IsDirectory { ino });
        }
        entry.fullpath.clone()
    };
    let handle = tree.backend.open(ino, &path).await?;
    let fh = table.next_fh.fetch_add(1, Ordering::Relaxed);
    table.handles.insert(fh, OpenFile { ino, path, handle });
    Ok(fh)
}

pub async fn read(table: &FileHandleTable, fh: u64, offset: u64, len: u32) -> Result<Vec<u8>> {
    let open_file = table.handles.get(&fh).ok_or(TreeError::NoHandleBuffer { fh })?;
    open_file.handle.read(offset, len).await
}

/// Writes `data` at `offset` on `fh`, extending the cached size if the
/// write grows the file (§4.5).
pub async fn write(tree: &Tree, table: &FileHandleTable, fh: u64, offset: u64, data: &[u8]) -> Result<usize> {
    let ino = {
        let open_file = table.handles.get(&fh).ok_or(TreeError::NoHandleBuffer { fh })?;
        open_file.ino
    };
    let written = {
        let open_file = table.handles.get(&fh).ok_or(TreeError::NoHandleBuffer { fh })?;
        open_file.handle.write(offset, data).await?
    };
    // The block cache, when it holds the authoritative length for this
    // inode's buffered content, takes precedence over a locally-derived
    // offset+written guess (§4.5).
    let block_cache_len = tree.backend.file_length(ino).await;
    let mut state = tree.state.lock().await;
    let entry = state.get_mut(ino)?;
    match block_cache_len {
        Some(len) => entry.size = len,
        None => {
            let new_end = offset + written as u64;
            if new_end > entry.size {
                entry.size = new_end;
            }
        }
    }
    entry.is_modified = true;
    entry.updated_time = SystemTime::now();
    Ok(written)
}

/// Closes `fh`, flushing any locally-modified content to the backend
/// before the handle is dropped (§4.5).
pub async fn release(tree: &Tree, table: &FileHandleTable, fh: u64) -> Result<()> {
    let (ino, path, is_modified, size, mode) = {
        let state = tree.state.lock().await;
        let open_file = table.handles.get(&fh).ok_or(TreeError::NoHandleBuffer { fh })?;
        let entry = state.get(open_file.ino)?;
        (open_file.ino, open_file.path.clone(), entry.is_modified, entry.size, entry.mode)
    };

    if is_modified {
        let content = {
            let open_file = table.handles.get(&fh).ok_or(TreeError::NoHandleBuffer { fh })?;
            open_file.handle.read(0, size as u32).await?
        };
        {
            let open_file = table.handles.get(&fh).ok_or(TreeError::NoHandleBuffer { fh })?;
            open_file.handle.simple_upload(&path, &content, mode).await?;
        }
        let mut state = tree.state.lock().await;
        if let Ok(entry) = state.get_mut(ino) {
            entry.is_modified = false;
            entry.updated_time = SystemTime::now();
        }
        debug!(ino, "tree: file flushed on release");
    }

    table.handles.remove(&fh);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use crate::entry::ROOT_INODE;
    use crate::mock::MockBackend;
    use std::sync::Arc;

    fn new_test_tree() -> Tree {
        Tree::new(TreeConfig::default(), Arc::new(MockBackend::new()))
    }

    #[tokio::test]
    async fn create_then_open_then_write_then_read_round_trips() {
        let tree = new_test_tree();
        let table = FileHandleTable::new();
        let ino = create(&tree, ROOT_INODE, "a.txt").await.unwrap();
        let fh = open(&tree, &table, ino).await.unwrap();
        write(&tree, &table, fh, 0, b"hello").await.unwrap();
        let data = read(&table, fh, 0, 5).await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn write_extends_cached_size() {
        let tree = new_test_tree();
        let table = FileHandleTable::new();
        let ino = create(&tree, ROOT_INODE, "a.txt").await.unwrap();
        let fh = open(&tree, &table, ino).await.unwrap();
        write(&tree, &table, fh, 0, b"hello").await.unwrap();
        let entry = tree.entry_snapshot(ino).await.unwrap();
        assert_eq!(entry.size, 5);
    }

    #[tokio::test]
    async fn release_clears_modified_flag_after_flush() {
        let tree = new_test_tree();
        let table = FileHandleTable::new();
        let ino = create(&tree, ROOT_INODE, "a.txt").await.unwrap();
        let fh = open(&tree, &table, ino).await.unwrap();
        write(&tree, &table, fh, 0, b"hi").await.unwrap();
        release(&tree, &table, fh).await.unwrap();
        let entry = tree.entry_snapshot(ino).await.unwrap();
        assert!(!entry.is_modified);
    }

    #[tokio::test]
    async fn create_reuses_existing_same_type_child() {
        let tree = new_test_tree();
        let ino = create(&tree, ROOT_INODE, "a.txt").await.unwrap();
        {
            let mut state = tree.state.lock().await;
            state.get_mut(ino).unwrap().removed = true;
            state.get_mut(ino).unwrap().is_modified = false;
        }
        let reused = create(&tree, ROOT_INODE, "a.txt").await.unwrap();
        assert_eq!(reused, ino, "create must reuse the existing inode, not allocate a new one");
        let entry = tree.entry_snapshot(ino).await.unwrap();
        assert!(!entry.removed);
        assert!(entry.is_modified);
    }

    #[tokio::test]
    async fn create_over_an_existing_directory_of_the_same_name_fails() {
        let tree = new_test_tree();
        crate::directory::mkdir(&tree, ROOT_INODE, "d").await.unwrap();
        let err = create(&tree, ROOT_INODE, "d").await.unwrap_err();
        assert!(matches!(err, TreeError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn create_under_file_parent_fails() {
        let tree = new_test_tree();
        let file_ino = create(&tree, ROOT_INODE, "a.txt").await.unwrap();
        let err = create(&tree, file_ino, "b.txt").await.unwrap_err();
        assert!(matches!(err, TreeError::NotADirectory { .. }));
    }

    #[tokio::test]
    async fn reading_after_release_is_an_error() {
        let tree = new_test_tree();
        let table = FileHandleTable::new();
        let ino = create(&tree, ROOT_INODE, "a.txt").await.unwrap();
        let fh = open(&tree, &table, ino).await.unwrap();
        release(&tree, &table, fh).await.unwrap();
        assert!(read(&table, fh, 0, 1).await.is_err());
    }

    #[tokio::test]
    async fn write_prefers_block_cache_reported_length_when_present() {
        let backend = Arc::new(MockBackend::new());
        let tree = Tree::new(TreeConfig::default(), backend.clone());
        let table = FileHandleTable::new();
        let ino = create(&tree, ROOT_INODE, "a.txt").await.unwrap();
        let fh = open(&tree, &table, ino).await.unwrap();
        backend.set_block_cache_length(ino, 999).await;
        write(&tree, &table, fh, 0, b"hi").await.unwrap();
        let entry = tree.entry_snapshot(ino).await.unwrap();
        assert_eq!(entry.size, 999);
    }
}
