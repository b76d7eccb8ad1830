//! Symlink creation and resolution (§4.9). A symlink is a file entry whose
//! mode carries `S_IFLNK`; its target is the object payload. `readlink`
//! always re-downloads via the backend rather than caching the target
//! locally, since a cached stale target is worse than one extra round trip.

use crate::entry::{Entry, EntryKind, InodeId, S_IFLNK};
use crate::error::{Result, TreeError};
use crate::tree::Tree;

/// Creates a symlink named `name` under `parent` whose target is `target`,
/// uploading `target` as the object payload immediately.
pub async fn symlink(tree: &Tree, parent: InodeId, name: &str, target: &str) -> Result<InodeId> {
    let (ino, fullpath) = {
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
        let ino = state.alloc_inode();
        let mut entry = Entry::new_root(S_IFLNK | 0o777);
        entry.ino = ino;
        entry.parent = parent;
        entry.basename = name.to_string();
        entry.fullpath = fullpath.clone();
        entry.kind = EntryKind::File;
        entry.children = None;
        entry.size = target.len() as u64;
        state.entries.insert(ino, entry);
        state
            .get_mut(parent)?
            .children
            .get_or_insert_with(Default::default)
            .insert(name.to_string(), ino);
        (ino, fullpath)
    };

    let handle = tree.backend.open(ino, &fullpath).await?;
    handle
        .simple_upload(&fullpath, target.as_bytes(), S_IFLNK | 0o777)
        .await?;
    Ok(ino)
}

/// Resolves the target of symlink `ino` by downloading its payload.
pub async fn readlink(tree: &Tree, ino: InodeId) -> Result<String> {
    let entry = tree.entry_snapshot(ino).await?;
    if !entry.is_symlink() {
        return Err(TreeError::InvalidArgument {
            msg: format!("inode {ino} is not a symlink"),
        });
    }
    let handle = tree.backend.open(ino, &entry.fullpath).await?;
    let bytes = handle.simple_download(&entry.fullpath).await?;
    String::from_utf8(bytes).map_err(|e| TreeError::InvalidArgument { msg: e.to_string() })
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
    async fn symlink_then_readlink_round_trips_the_target() {
        let tree = new_test_tree();
        let ino = symlink(&tree, ROOT_INODE, "link", "/etc/hosts").await.unwrap();
        let target = readlink(&tree, ino).await.unwrap();
        assert_eq!(target, "/etc/hosts");
    }

    #[tokio::test]
    async fn symlink_entry_carries_the_link_mode_bit() {
        let tree = new_test_tree();
        let ino = symlink(&tree, ROOT_INODE, "link", "target").await.unwrap();
        let entry = tree.entry_snapshot(ino).await.unwrap();
        assert!(entry.is_symlink());
    }

    #[tokio::test]
    async fn readlink_of_a_regular_file_is_rejected() {
        let tree = new_test_tree();
        let ino = crate::fileops::create(&tree, ROOT_INODE, "a.txt").await.unwrap();
        let err = readlink(&tree, ino).await.unwrap_err();
        assert!(matches!(err, TreeError::InvalidArgument { .. }));
    }
}
