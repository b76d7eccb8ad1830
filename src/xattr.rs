//! Extended attributes (§4.8): exactly three builtin names backed by
//! fields already on `Entry`, refreshed from a HEAD probe when stale rather
//! than maintained as an open-ended key/value store.

use crate::entry::{EntryKind, InodeId};
use crate::error::{Result, TreeError};
use crate::tree::Tree;
use std::time::SystemTime;

pub const XATTR_ETAG: &str = "user.etag";
pub const XATTR_MD5: &str = "user.md5";
pub const XATTR_VERSION: &str = "user.version";
pub const XATTR_CONTENT_TYPE: &str = "user.content_type";

fn xattrs_stale(xattr_time: Option<SystemTime>, max_age: std::time::Duration) -> bool {
    match xattr_time {
        None => true,
        Some(t) => match SystemTime::now().duration_since(t) {
            Err(_) => false,
            Ok(elapsed) => elapsed >= max_age,
        },
    }
}

async fn refresh_xattrs(tree: &Tree, ino: InodeId) -> Result<()> {
    let fullpath = tree.entry_snapshot(ino).await?.fullpath;
    let head = tree.backend.head(&fullpath).await?;
    let mut state = tree.state.lock().await;
    let entry = state.get_mut(ino)?;
    entry.etag = head.etag;
    entry.version_id = head.version_id;
    entry.content_type = head.content_type;
    entry.xattr_time = Some(SystemTime::now());
    Ok(())
}

/// Returns the value of one of the three builtin xattrs for `ino`,
/// refreshing from the backend first if the cached values are stale.
pub async fn getxattr(tree: &Tree, ino: InodeId, name: &str) -> Result<Vec<u8>> {
    if !matches!(name, XATTR_ETAG | XATTR_MD5 | XATTR_VERSION | XATTR_CONTENT_TYPE) {
        return Err(TreeError::NotSupported { op: format!("xattr {name}") });
    }

    if tree.entry_snapshot(ino).await?.kind == EntryKind::Directory {
        return Err(TreeError::NotFound { ino });
    }

    let stale = {
        let entry = tree.entry_snapshot(ino).await?;
        xattrs_stale(entry.xattr_time, tree.config.file_cache_max_time)
    };
    if stale {
        refresh_xattrs(tree, ino).await?;
    }

    let entry = tree.entry_snapshot(ino).await?;
    let value = match name {
        XATTR_ETAG | XATTR_MD5 => entry.etag,
        XATTR_VERSION => entry.version_id,
        XATTR_CONTENT_TYPE => entry.content_type,
        _ => unreachable!(),
    };
    value.map(|v| v.into_bytes()).ok_or(TreeError::NotFound { ino })
}
