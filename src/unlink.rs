//! Unlink and rmdir (§4.6). Both dispatch a `DELETE` to the backend before
//! touching local state, then remove the name from the parent's children
//! index and tombstone the entry rather than dropping it outright — an
//! inode already handed to an open file handle must remain resolvable by
//! number until that handle is released (§5).

use crate::entry::{EntryKind, InodeId};
use crate::error::{Result, TreeError};
use crate::tree::Tree;
use std::time::SystemTime;
use tracing::debug;

fn resolve_child(state: &crate::tree::TreeState, parent: InodeId, name: &str) -> Result<InodeId> {
    let parent_entry = state.get(parent)?;
    if parent_entry.kind != EntryKind::Directory {
        return Err(TreeError::NotADirectory { ino: parent });
    }
    parent_entry
        .children
        .as_ref()
        .and_then(|c| c.get(name))
        .copied()
        .ok_or_else(|| TreeError::NameNotFound {
            parent,
            name: name.to_string(),
        })
}

fn tombstone(state: &mut crate::tree::TreeState, parent: InodeId, name: &str, child: InodeId) -> Result<()> {
    if let Ok(parent_entry) = state.get_mut(parent) {
        if let Some(children) = parent_entry.children.as_mut() {
            children.remove(name);
        }
        // A server-side operation that modifies an entry always invalidates
        // the parent's listing cache before its completion returns (§5).
        parent_entry.dir_cache = None;
        parent_entry.dir_cache_created = None;
    }
    let entry = state.get_mut(child)?;
    entry.removed = true;
    entry.age = 0;
    entry.updated_time = SystemTime::now();
    entry.access_time = entry.updated_time;
    Ok(())
}

/// Removes a file. Errs with `IsDirectory` if `name` names a directory
/// (use `rmdir` instead).
pub async fn unlink(tree: &Tree, parent: InodeId, name: &str) -> Result<()> {
    let (child, fullpath) = {
        let state = tree.state.lock().await;
        let child = resolve_child(&state, parent, name)?;
        let child_entry = state.get(child)?;
        if child_entry.kind == EntryKind::Directory {
            return Err(TreeError::IsDirectory { ino: child });
        }
        (child, child_entry.fullpath.clone())
    };

    // Drop any block-cache content for this inode before the remote delete
    // so a concurrent read doesn't serve bytes for an object already gone
    // from the store (§4.6).
    tree.backend.remove_file(child).await;
    tree.backend.delete(&fullpath).await?;

    let mut state = tree.state.lock().await;
    tombstone(&mut state, parent, name, child)?;
    debug!(parent, name, "tree: unlink");
    Ok(())
}

/// Removes an empty directory. Errs with `NotEmpty` if any visible child
/// remains in the current listing generation.
pub async fn rmdir(tree: &Tree, parent: InodeId, name: &str) -> Result<()> {
    let (child, fullpath) = {
        let state = tree.state.lock().await;
        let child = resolve_child(&state, parent, name)?;
        let child_entry = state.get(child)?;
        if child_entry.kind != EntryKind::Directory {
            return Err(TreeError::NotADirectory { ino: child });
        }
        let has_visible_children = child_entry
            .children
            .as_ref()
            .map(|c| c.values().any(|ino| state.get(*ino).map(|e| !e.removed).unwrap_or(false)))
            .unwrap_or(false);
        if has_visible_children {
            return Err(TreeError::NotEmpty { ino: child });
        }
        (child, child_entry.fullpath.clone())
    };

    tree.backend.delete(&fullpath).await?;

    let mut state = tree.state.lock().await;
    tombstone(&mut state, parent, name, child)?;
    debug!(parent, name, "tree: rmdir");
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

    fn new_test_tree_with_backend() -> (Tree, Arc<MockBackend>) {
        let backend = Arc::new(MockBackend::new());
        (Tree::new(TreeConfig::default(), backend.clone()), backend)
    }

    #[tokio::test]
    async fn unlink_removes_name_from_parent_and_tombstones_entry() {
        let tree = new_test_tree();
        let ino = crate::fileops::create(&tree, ROOT_INODE, "a.txt").await.unwrap();
        unlink(&tree, ROOT_INODE, "a.txt").await.unwrap();
        let root = tree.entry_snapshot(ROOT_INODE).await.unwrap();
        assert!(!root.children.unwrap().contains_key("a.txt"));
        let entry = tree.entry_snapshot(ino).await.unwrap();
        assert!(entry.removed);
    }

    #[tokio::test]
    async fn unlink_of_a_directory_is_rejected() {
        let tree = new_test_tree();
        crate::directory::mkdir(&tree, ROOT_INODE, "d").await.unwrap();
        let err = unlink(&tree, ROOT_INODE, "d").await.unwrap_err();
        assert!(matches!(err, TreeError::IsDirectory { .. }));
    }

    #[tokio::test]
    async fn rmdir_of_nonempty_directory_is_rejected() {
        let tree = new_test_tree();
        crate::directory::mkdir(&tree, ROOT_INODE, "d").await.unwrap();
        let d_ino = {
            let root = tree.entry_snapshot(ROOT_INODE).await.unwrap();
            root.children.unwrap()["d"]
        };
        crate::fileops::create(&tree, d_ino, "a.txt").await.unwrap();
        let err = rmdir(&tree, ROOT_INODE, "d").await.unwrap_err();
        assert!(matches!(err, TreeError::NotEmpty { .. }));
    }

    #[tokio::test]
    async fn rmdir_of_empty_directory_succeeds() {
        let tree = new_test_tree();
        crate::directory::mkdir(&tree, ROOT_INODE, "d").await.unwrap();
        rmdir(&tree, ROOT_INODE, "d").await.unwrap();
        let root = tree.entry_snapshot(ROOT_INODE).await.unwrap();
        assert!(!root.children.unwrap().contains_key("d"));
    }

    #[tokio::test]
    async fn unlink_drops_block_cache_content_for_the_inode() {
        let (tree, backend) = new_test_tree_with_backend();
        let ino = crate::fileops::create(&tree, ROOT_INODE, "a.txt").await.unwrap();
        backend.set_block_cache_length(ino, 5).await;
        unlink(&tree, ROOT_INODE, "a.txt").await.unwrap();
        assert_eq!(backend.block_cache_removed_inos().await, vec![ino]);
    }
}
