//! Rename (§4.7): implemented as a backend `PUT` copy to the new key
//! followed by a `DELETE` of the old one — the object store has no atomic
//! rename primitive. Refused outright for directories (no recursive
//! rename) and for objects at or above the single-copy size limit.

use crate::entry::{EntryKind, InodeId};
use crate::error::{Result, TreeError};
use crate::tree::Tree;
use std::time::SystemTime;
use tracing::debug;

/// The object store's single-copy limit (5 GiB); renaming anything at or
/// above this size is refused rather than attempted and failed midway.
pub const MAX_COPY_SIZE: u64 = 5 * 1024 * 1024 * 1024;

pub async fn rename(
    tree: &Tree,
    old_parent: InodeId,
    old_name: &str,
    new_parent: InodeId,
    new_name: &str,
) -> Result<()> {
    let (child, old_path, new_path) = {
        let state = tree.state.lock().await;
        let old_parent_entry = state.get(old_parent)?;
        if old_parent_entry.kind != EntryKind::Directory {
            return Err(TreeError::NotADirectory { ino: old_parent });
        }
        let child = old_parent_entry
            .children
            .as_ref()
            .and_then(|c| c.get(old_name))
            .copied()
            .ok_or_else(|| TreeError::NameNotFound {
                parent: old_parent,
                name: old_name.to_string(),
            })?;
        let child_entry = state.get(child)?;
        if child_entry.kind == EntryKind::Directory {
            return Err(TreeError::NotSupported {
                op: "rename of a directory".to_string(),
            });
        }
        if child_entry.size >= MAX_COPY_SIZE {
            return Err(TreeError::NotSupported {
                op: format!("rename of an object >= {MAX_COPY_SIZE} bytes"),
            });
        }
        let new_parent_entry = state.get(new_parent)?;
        if new_parent_entry.kind != EntryKind::Directory {
            return Err(TreeError::NotADirectory { ino: new_parent });
        }
        let new_path = new_parent_entry.child_fullpath(new_name);
        (child, child_entry.fullpath.clone(), new_path)
    };

    let copy_source = if tree.config.bucket_name.is_empty() {
        format!("{}{}", tree.config.key_prefix, old_path)
    } else {
        format!("{}/{}{}", tree.config.bucket_name, tree.config.key_prefix, old_path)
    };
    tree.backend
        .put_copy(&new_path, &copy_source, &tree.config.storage_type)
        .await?;
    tree.backend.delete(&old_path).await?;

    let mut state = tree.state.lock().await;
    if let Ok(old_parent_entry) = state.get_mut(old_parent) {
        if let Some(children) = old_parent_entry.children.as_mut() {
            children.remove(old_name);
        }
        old_parent_entry.dir_cache = None;
        old_parent_entry.dir_cache_created = None;
    }
    if let Ok(new_parent_entry) = state.get_mut(new_parent) {
        new_parent_entry
            .children
            .get_or_insert_with(Default::default)
            .insert(new_name.to_string(), child);
        new_parent_entry.dir_cache = None;
        new_parent_entry.dir_cache_created = None;
    }
    if let Ok(entry) = state.get_mut(child) {
        entry.parent = new_parent;
        entry.basename = new_name.to_string();
        entry.fullpath = new_path;
        entry.removed = false;
        entry.updated_time = SystemTime::now();
    }
    debug!(old_parent, old_name, new_parent, new_name, "tree: rename");
    Ok(())
}
