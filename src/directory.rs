//! Directory listing cache: TTL-based expiry, single-flight refresh against
//! the backend, and the post-refresh sweep that tombstones children no
//! longer observed in the current generation (§4.2).

use crate::entry::{DirBufEntry, Entry, EntryKind, InodeId};
use crate::error::{Result, TreeError};
use crate::tree::Tree;
use std::time::SystemTime;
use tracing::{debug, warn};

pub(crate) fn is_dir_cache_expired(entry: &Entry, max_age: std::time::Duration) -> bool {
    match entry.dir_cache_created {
        None => true,
        Some(created) => match SystemTime::now().duration_since(created) {
            // A clock that appears to have moved backward relative to the
            // cache's creation time is never treated as expired (§8
            // boundary condition): `duration_since` returning an error here
            // means `now < created`.
            Err(_) => false,
            Ok(elapsed) => elapsed >= max_age,
        },
    }
}

/// Ensures `dir_ino`'s listing is fresh, refreshing from the backend under
/// a single-flight guard if it is stale or has never been populated.
pub async fn ensure_fresh(tree: &Tree, dir_ino: InodeId) -> Result<()> {
    loop {
        let (needs_refresh, notify) = {
            let mut state = tree.state.lock().await;
            let entry = state.get(dir_ino)?;
            if entry.kind != EntryKind::Directory {
                return Err(TreeError::NotADirectory { ino: dir_ino });
            }
            if !is_dir_cache_expired(entry, tree.config.dir_cache_max_time) {
                return Ok(());
            }
            if entry.dir_cache_updating {
                (false, Some(state.dir_refresh_notify(dir_ino)))
            } else {
                state.get_mut(dir_ino)?.dir_cache_updating = true;
                (true, None)
            }
        };

        if !needs_refresh {
            debug!(ino = dir_ino, "tree: dir_cache single-flight wait");
            notify.unwrap().notified().await;
            continue;
        }

        debug!(ino = dir_ino, "tree: dir_cache refresh dispatch");
        let fullpath = tree.entry_snapshot(dir_ino).await?.fullpath;
        let listing = tree.backend.list(&fullpath).await;

        let mut state = tree.state.lock().await;
        let notify = state.dir_refresh_notify(dir_ino);
        let result = match listing {
            Ok(listed) => {
                apply_listing(&mut state, dir_ino, listed, tree.config.dir_cache_max_time)?;
                Ok(())
            }
            Err(e) => {
                warn!(ino = dir_ino, error = %e, "tree: dir_cache refresh failed");
                Err(e)
            }
        };
        if let Ok(entry) = state.get_mut(dir_ino) {
            entry.dir_cache_updating = false;
        }
        notify.notify_waiters();
        return result;
    }
}

fn apply_listing(
    state: &mut crate::tree::TreeState,
    dir_ino: InodeId,
    listed: Vec<crate::collaborators::ListedEntry>,
    dir_cache_max_time: std::time::Duration,
) -> Result<()> {
    let new_age = state.get(dir_ino)?.age.wrapping_add(1);
    let file_mode_default = 0o100644;

    let mut buf_entries = Vec::with_capacity(listed.len());
    for item in &listed {
        let existing_ino = state.get(dir_ino)?.children.as_ref().and_then(|c| c.get(&item.basename)).copied();
        let child_ino = match existing_ino {
            Some(ino) => ino,
            None => {
                let ino = state.alloc_inode();
                let parent_fullpath = state.get(dir_ino)?.child_fullpath(&item.basename);
                let kind = if item.is_prefix { EntryKind::Directory } else { EntryKind::File };
                let mode = if item.is_prefix { state.get(dir_ino)?.mode } else { file_mode_default };
                let mut new_entry = Entry::new_root(mode);
                new_entry.ino = ino;
                new_entry.parent = dir_ino;
                new_entry.basename = item.basename.clone();
                new_entry.fullpath = parent_fullpath;
                new_entry.kind = kind;
                new_entry.children = if item.is_prefix { Some(Default::default()) } else { None };
                state.entries.insert(ino, new_entry);
                state
                    .get_mut(dir_ino)?
                    .children
                    .get_or_insert_with(Default::default)
                    .insert(item.basename.clone(), ino);
                ino
            }
        };

        let child = state.get_mut(child_ino)?;
        child.size = item.size;
        child.ctime = item.last_modified;
        child.age = new_age;
        child.removed = false;
        buf_entries.push(DirBufEntry {
            name: item.basename.clone(),
            ino: child_ino,
            kind: child.kind,
        });
    }

    // Sweep: a file child not touched by this refresh generation is
    // destroyed once it is neither locally modified nor recently touched.
    // Destruction strips the entry from the inode index first, then from
    // the parent's children map (§4.2, §8 invariant 4). Directories are
    // never swept — surviving subtree lifetime is preserved; reclaiming
    // stale directories is a non-goal (§4.2).
    let child_entries: Vec<(String, InodeId)> = state
        .get(dir_ino)?
        .children
        .as_ref()
        .map(|c| c.iter().map(|(name, ino)| (name.clone(), *ino)).collect())
        .unwrap_or_default();
    let now = SystemTime::now();
    let mut to_destroy = Vec::new();
    for (name, ino) in child_entries {
        if let Ok(child) = state.get(ino) {
            if child.kind == EntryKind::Directory {
                continue;
            }
            if child.age >= new_age || child.is_modified {
                continue;
            }
            let stale = now
                .duration_since(child.access_time)
                .map(|elapsed| elapsed >= dir_cache_max_time)
                .unwrap_or(false);
            if stale {
                to_destroy.push((name, ino));
            }
        }
    }
    for (name, ino) in &to_destroy {
        state.entries.remove(ino);
        if let Some(children) = state.get_mut(dir_ino)?.children.as_mut() {
            children.remove(name);
        }
    }

    let self_ino = dir_ino;
    let dir_entry = state.get_mut(dir_ino)?;
    dir_entry.age = new_age;
    dir_entry.dir_cache = Some(crate::entry::format_dir_buffer(self_ino, &buf_entries));
    dir_entry.dir_cache_created = Some(SystemTime::now());
    Ok(())
}

/// Creates a new empty directory under `parent` (§6.1 `mkdir`), visible in
/// the parent's listing immediately, mirroring `create`'s treatment of new
/// files in `fileops.rs`.
pub async fn mkdir(tree: &Tree, parent: InodeId, name: &str) -> Result<InodeId> {
    let mut state = tree.state.lock().await;
    let parent_entry = state.get(parent)?;
    if parent_entry.kind != EntryKind::Directory {
        return Err(TreeError::NotADirectory { ino: parent });
    }
    if parent_entry.children.as_ref().map(|c| c.contains_key(name)).unwrap_or(false) {
        return Err(TreeError::TypeMismatch {
            parent,
            name: name.to_string(),
        });
    }
    let fullpath = parent_entry.child_fullpath(name);
    let parent_age = parent_entry.age;
    let ino = state.alloc_inode();
    let mut entry = Entry::new_root(tree.config.dir_mode);
    entry.ino = ino;
    entry.parent = parent;
    entry.basename = name.to_string();
    entry.fullpath = fullpath;
    entry.age = parent_age;
    entry.is_modified = true;
    state.entries.insert(ino, entry);
    state
        .get_mut(parent)?
        .children
        .get_or_insert_with(Default::default)
        .insert(name.to_string(), ino);
    Ok(ino)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ListedEntry;
    use crate::config::TreeConfig;
    use crate::entry::ROOT_INODE;
    use crate::mock::MockBackend;
    use std::sync::Arc;
    use std::time::Duration;

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

    #[tokio::test]
    async fn refresh_populates_children_and_buffer() {
        let backend = Arc::new(MockBackend::new());
        backend.set_listing("", listing_of(&["a.txt", "b.txt"])).await;
        let tree = Tree::new(TreeConfig::default(), backend);
        ensure_fresh(&tree, ROOT_INODE).await.unwrap();
        let root = tree.entry_snapshot(ROOT_INODE).await.unwrap();
        assert_eq!(root.children.unwrap().len(), 2);
        assert!(root.dir_cache.is_some());
    }

    #[tokio::test]
    async fn second_refresh_destroys_disappeared_children() {
        let backend = Arc::new(MockBackend::new());
        backend.set_listing("", listing_of(&["a.txt", "b.txt"])).await;
        let mut config = TreeConfig::default();
        config.dir_cache_max_time = Duration::from_millis(0);
        let tree = Tree::new(config, backend.clone());
        ensure_fresh(&tree, ROOT_INODE).await.unwrap();

        let b_ino = tree.entry_snapshot(ROOT_INODE).await.unwrap().children.unwrap()["b.txt"];

        backend.set_listing("", listing_of(&["a.txt"])).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        ensure_fresh(&tree, ROOT_INODE).await.unwrap();

        let root = tree.entry_snapshot(ROOT_INODE).await.unwrap();
        let children = root.children.unwrap();
        assert!(!children.contains_key("b.txt"), "destroyed child must be gone from the children map");
        assert!(
            tree.entry_snapshot(b_ino).await.is_err(),
            "destroyed child must be gone from the inode index"
        );
        let a_ino = children["a.txt"];
        let a = tree.entry_snapshot(a_ino).await.unwrap();
        assert!(!a.removed);
    }

    #[tokio::test]
    async fn fresh_cache_is_not_refreshed_twice() {
        let backend = Arc::new(MockBackend::new());
        backend.set_listing("", listing_of(&["a.txt"])).await;
        let tree = Tree::new(TreeConfig::default(), backend.clone());
        ensure_fresh(&tree, ROOT_INODE).await.unwrap();
        backend.set_listing("", listing_of(&["a.txt", "b.txt"])).await;
        ensure_fresh(&tree, ROOT_INODE).await.unwrap();
        let root = tree.entry_snapshot(ROOT_INODE).await.unwrap();
        assert_eq!(root.children.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clock_regression_is_not_treated_as_expired() {
        let backend = Arc::new(MockBackend::new());
        backend.set_listing("", listing_of(&["a.txt"])).await;
        let tree = Tree::new(TreeConfig::default(), backend);
        ensure_fresh(&tree, ROOT_INODE).await.unwrap();
        {
            let mut state = tree.state.lock().await;
            let entry = state.get_mut(ROOT_INODE).unwrap();
            entry.dir_cache_created = Some(SystemTime::now() + Duration::from_secs(3600));
        }
        assert!(!is_dir_cache_expired(
            &tree.entry_snapshot(ROOT_INODE).await.unwrap(),
            tree.config.dir_cache_max_time
        ));
    }
}
