//! The lookup resolver (§4.4): given a parent inode and a basename, decides
//! whether the answer can be served from the directory cache outright, from
//! a still-valid negative cache entry, as a confirmed absence (the parent's
//! listing is fresh and simply does not contain the name), or requires a
//! single bounded HEAD probe against the backend. Two further cases keep a
//! cache-hit entry itself honest: a locally-modified file's attributes are
//! refreshed from a HEAD before being reported, and a zero-length file is
//! re-probed under configured policy in case it is actually a directory
//! marker.

use crate::collaborators::HeadResponse;
use crate::entry::{Entry, EntryKind, InodeId};
use crate::error::{Result, TreeError};
use crate::tree::{Tree, TreeState};
use std::time::SystemTime;
use tracing::{debug, warn};

fn negative_cache_still_valid(entry: &Entry, max_age: std::time::Duration) -> bool {
    match SystemTime::now().duration_since(entry.access_time) {
        Err(_) => true,
        Ok(elapsed) => elapsed < max_age,
    }
}

fn dir_cache_is_expired(entry: &Entry, max_age: std::time::Duration) -> bool {
    match entry.dir_cache_created {
        None => true,
        Some(created) => match SystemTime::now().duration_since(created) {
            Err(_) => false,
            Ok(elapsed) => elapsed >= max_age,
        },
    }
}

/// Applies a HEAD response to `ino`'s attributes. A `Content-Type:
/// application/x-directory` response converts the entry in place: type
/// becomes directory, a children map is allocated if absent, the entry's own
/// directory cache is cleared, and mode is reset to the configured
/// directory default (§4.4 tail paragraph).
fn apply_head_response(state: &mut TreeState, ino: InodeId, head: HeadResponse, dir_mode: u32) -> Result<()> {
    let is_dir_marker = head.content_type.as_deref() == Some("application/x-directory");
    let entry = state.get_mut(ino)?;
    entry.size = head.size;
    entry.ctime = head.last_modified;
    entry.etag = head.etag;
    entry.version_id = head.version_id;
    entry.content_type = head.content_type;
    entry.removed = false;
    entry.updated_time = SystemTime::now();
    if is_dir_marker && entry.kind == EntryKind::File {
        entry.kind = EntryKind::Directory;
        entry.mode = dir_mode;
        entry.dir_cache = None;
        entry.dir_cache_created = None;
        if entry.children.is_none() {
            entry.children = Some(Default::default());
        }
        debug!(ino, "tree: lookup promoted empty file to directory marker");
    }
    Ok(())
}

/// Resolves `name` under `parent`, returning the child's inode.
///
/// Cases, in order: (1) parent missing, (2) parent not a directory, (3)
/// parent's listing cache is expired — refresh it and retry the lookup once,
/// (4) tombstoned name still within its negative-cache window, (5) a cached
/// file whose local write hasn't flushed yet — refresh attributes from a HEAD
/// before reporting, (6) a cached zero-length file under empty-file policy —
/// HEAD to rule out a directory marker, (7) otherwise — cached attributes
/// returned synchronously, (8) unknown name, or a name absent even from a
/// fresh listing — single HEAD probe, bounded to one retry on dispatch
/// failure (a fresh-but-absent name still gets probed: the listing can
/// lag a concurrent single-key write).
pub async fn lookup(tree: &Tree, parent: InodeId, name: &str) -> Result<InodeId> {
    lookup_bounded(tree, parent, name, true).await
}

fn lookup_bounded<'a>(
    tree: &'a Tree,
    parent: InodeId,
    name: &'a str,
    allow_refresh_retry: bool,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<InodeId>> + 'a>> {
    Box::pin(async move {
        let (child_ino, dir_is_fresh) = {
            let state = tree.state.lock().await;
            let parent_entry = state.get(parent)?; // case 1
            if parent_entry.kind != EntryKind::Directory {
                return Err(TreeError::NotADirectory { ino: parent }); // case 2
            }
            let child_ino = parent_entry.children.as_ref().and_then(|c| c.get(name)).copied();
            let is_fresh = !dir_cache_is_expired(parent_entry, tree.config.dir_cache_max_time);
            (child_ino, is_fresh)
        };

        // case 3: parent's listing cache is stale. Refresh the whole
        // directory and retry once; a second staleness after the refresh
        // (e.g. a zero-duration TTL in tests) falls through rather than
        // looping, per the spec's bounded-retry-depth-of-one rule.
        if !dir_is_fresh && allow_refresh_retry {
            crate::directory::ensure_fresh(tree, parent).await?;
            return lookup_bounded(tree, parent, name, false).await;
        }

        if let Some(ino) = child_ino {
            let (visible, removed, dir_mode) = {
                let state = tree.state.lock().await;
                let entry = state.get(ino)?;
                let parent_age = state.get(parent)?.age;
                (entry.is_listing_visible(parent_age), entry.removed, tree.config.dir_mode)
            };

            if removed {
                let entry = tree.entry_snapshot(ino).await?;
                if negative_cache_still_valid(&entry, tree.config.file_cache_max_time) {
                    debug!(parent, name, "tree: lookup negative cache hit");
                    return Err(TreeError::NameNotFound {
                        parent,
                        name: name.to_string(),
                    }); // case 4
                }
                // Older tombstones fall through to a fresh probe below.
            } else if visible {
                let entry = tree.entry_snapshot(ino).await?;

                if entry.kind == EntryKind::File && entry.is_modified && !entry.is_updating {
                    return refresh_modified_entry(tree, ino, dir_mode).await; // case 5
                }

                let empty_file_policy = tree.config.check_empty_files || tree.config.force_head_requests_on_lookup;
                if entry.kind == EntryKind::File && entry.size == 0 && empty_file_policy && !entry.is_updating {
                    let stale = SystemTime::now()
                        .duration_since(entry.updated_time)
                        .map(|elapsed| elapsed >= tree.config.dir_cache_max_time)
                        .unwrap_or(false);
                    if stale {
                        return refresh_empty_file_for_promotion(tree, ino, dir_mode).await; // case 6
                    }
                }

                debug!(parent, name, "tree: lookup cache hit");
                let mut state = tree.state.lock().await;
                state.get_mut(ino)?.access_time = SystemTime::now();
                return Ok(ino); // case 7
            }
        }

        // case 8: unknown name, or a name absent even from a just-refreshed
        // listing (the listing can lag a concurrent single-key write) —
        // single bounded HEAD probe, one retry on dispatch failure.
        let fullpath = {
            let state = tree.state.lock().await;
            state.get(parent)?.child_fullpath(name)
        };
        let mut attempt = tree.backend.head(&fullpath).await;
        if attempt.is_err() {
            warn!(parent, name, "tree: lookup probe retry");
            attempt = tree.backend.head(&fullpath).await;
        }

        match attempt {
            Ok(head) => apply_probe_hit(tree, parent, name, &fullpath, head).await,
            Err(_) => {
                apply_probe_miss(tree, parent, name, child_ino).await;
                Err(TreeError::NameNotFound {
                    parent,
                    name: name.to_string(),
                })
            }
        }
    })
}

/// Case 5: the entry has an unflushed local write. Dispatches a HEAD under
/// the per-entry `is_updating` single-flight guard and reports the
/// attributes only after it returns — concurrent lookups of the same inode
/// wait on the same refresh rather than each dispatching their own (§5).
async fn refresh_modified_entry(tree: &Tree, ino: InodeId, dir_mode: u32) -> Result<InodeId> {
    let (dispatch, notify, fullpath) = {
        let mut state = tree.state.lock().await;
        let entry = state.get(ino)?;
        if entry.is_updating {
            (false, Some(state.attr_refresh_notify(ino)), String::new())
        } else {
            let fullpath = entry.fullpath.clone();
            state.get_mut(ino)?.is_updating = true;
            (true, None, fullpath)
        }
    };

    if !dispatch {
        notify.unwrap().notified().await;
        return Ok(ino);
    }

    let head = tree.backend.head(&fullpath).await;
    let mut state = tree.state.lock().await;
    let notify = state.attr_refresh_notify(ino);
    if let Ok(head) = head {
        // entry may have been destroyed while the HEAD was in flight; a
        // missing entry means "no longer interested" (§5 cancellation).
        let _ = apply_head_response(&mut state, ino, head, dir_mode);
    } else {
        warn!(ino, "tree: is_modified attribute refresh failed");
    }
    if let Ok(entry) = state.get_mut(ino) {
        entry.is_updating = false;
    }
    notify.notify_waiters();
    Ok(ino)
}

/// Case 6: a cached zero-length file is re-probed to rule out (or confirm)
/// that it is actually a directory marker (§4.4 case 6, §6.2 `Content-Type:
/// application/x-directory`).
async fn refresh_empty_file_for_promotion(tree: &Tree, ino: InodeId, dir_mode: u32) -> Result<InodeId> {
    let (dispatch, notify, fullpath) = {
        let mut state = tree.state.lock().await;
        let entry = state.get(ino)?;
        if entry.is_updating {
            (false, Some(state.attr_refresh_notify(ino)), String::new())
        } else {
            let fullpath = entry.fullpath.clone();
            state.get_mut(ino)?.is_updating = true;
            (true, None, fullpath)
        }
    };

    if !dispatch {
        notify.unwrap().notified().await;
        return Ok(ino);
    }

    let head = tree.backend.head(&fullpath).await;
    let mut state = tree.state.lock().await;
    let notify = state.attr_refresh_notify(ino);
    if let Ok(head) = head {
        let _ = apply_head_response(&mut state, ino, head, dir_mode);
    } else {
        warn!(ino, "tree: empty-file promotion probe failed");
    }
    if let Ok(entry) = state.get_mut(ino) {
        entry.is_updating = false;
    }
    notify.notify_waiters();
    Ok(ino)
}

async fn apply_probe_hit(
    tree: &Tree,
    parent: InodeId,
    name: &str,
    fullpath: &str,
    head: HeadResponse,
) -> Result<InodeId> {
    let mut state = tree.state.lock().await;
    let existing = state.get(parent)?.children.as_ref().and_then(|c| c.get(name)).copied();
    let ino = match existing {
        Some(ino) => ino,
        None => {
            let ino = state.alloc_inode();
            let mut new_entry = Entry::new_root(tree.config.file_mode);
            new_entry.ino = ino;
            new_entry.parent = parent;
            new_entry.basename = name.to_string();
            new_entry.fullpath = fullpath.to_string();
            new_entry.kind = EntryKind::File;
            new_entry.children = None;
            state.entries.insert(ino, new_entry);
            state
                .get_mut(parent)?
                .children
                .get_or_insert_with(Default::default)
                .insert(name.to_string(), ino);
            ino
        }
    };
    apply_head_response(&mut state, ino, head, tree.config.dir_mode)?;
    Ok(ino)
}

async fn apply_probe_miss(tree: &Tree, parent: InodeId, name: &str, existing: Option<InodeId>) {
    let mut state = tree.state.lock().await;
    if let Some(ino) = existing {
        if let Ok(entry) = state.get_mut(ino) {
            entry.removed = true;
            entry.updated_time = SystemTime::now();
            entry.access_time = entry.updated_time;
        }
    } else {
        // Negative-cache the miss so a repeated lookup of the same absent
        // name doesn't re-probe until the window elapses.
        let ino = state.alloc_inode();
        let mut tombstone = Entry::new_root(tree.config.file_mode);
        tombstone.ino = ino;
        tombstone.parent = parent;
        tombstone.basename = name.to_string();
        tombstone.kind = EntryKind::File;
        tombstone.children = None;
        tombstone.removed = true;
        tombstone.updated_time = SystemTime::now();
        state.entries.insert(ino, tombstone);
        if let Ok(parent_entry) = state.get_mut(parent) {
            parent_entry
                .children
                .get_or_insert_with(Default::default)
                .insert(name.to_string(), ino);
        }
    }
}
