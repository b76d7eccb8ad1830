use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;

/// Inode identifier, unique within the tree's lifetime.
pub type InodeId = u64;

/// The reserved root inode number.
pub const ROOT_INODE: InodeId = 1;

pub const S_IFLNK: u32 = 0o120000;
pub const S_IFMT: u32 = 0o170000;

/// Type of a filesystem entry. Symlinks are files whose mode carries the
/// link bit (`S_IFLNK`); there is no separate symlink variant (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Directory,
    File,
}

/// One cached filesystem object: the unit this crate indexes, lists, and
/// refreshes. See spec §3 for the full field-by-field rationale.
#[derive(Debug, Clone)]
pub struct Entry {
    pub ino: InodeId,
    pub parent: InodeId,
    pub basename: String,
    pub fullpath: String,
    pub kind: EntryKind,
    pub mode: u32,
    pub size: u64,
    pub ctime: SystemTime,

    pub age: u64,
    pub removed: bool,
    pub is_modified: bool,
    pub is_updating: bool,

    pub access_time: SystemTime,
    pub updated_time: SystemTime,

    /// Directories only: the last formatted directory-buffer blob.
    pub dir_cache: Option<Vec<u8>>,
    pub dir_cache_created: Option<SystemTime>,
    pub dir_cache_updating: bool,

    /// Directories only: basename -> child inode. `Some(_)` (possibly
    /// empty) iff `kind == Directory`; `None` for files (invariant §3).
    pub children: Option<HashMap<String, InodeId>>,

    pub etag: Option<String>,
    pub version_id: Option<String>,
    pub content_type: Option<String>,
    pub xattr_time: Option<SystemTime>,
}

impl Entry {
    pub fn new_root(dir_mode: u32) -> Self {
        let now = SystemTime::now();
        Entry {
            ino: ROOT_INODE,
            parent: 0,
            basename: String::new(),
            fullpath: String::new(),
            kind: EntryKind::Directory,
            mode: dir_mode,
            size: 0,
            ctime: now,
            age: 0,
            removed: false,
            is_modified: false,
            is_updating: false,
            access_time: now,
            updated_time: now,
            dir_cache: None,
            dir_cache_created: None,
            dir_cache_updating: false,
            children: Some(HashMap::new()),
            etag: None,
            version_id: None,
            content_type: None,
            xattr_time: None,
        }
    }

    /// Computes the store key for a new child: parent.fullpath + "/" +
    /// basename, except directly under root, where the basename is the
    /// bare key (§4.1).
    pub fn child_fullpath(&self, basename: &str) -> String {
        if self.ino == ROOT_INODE {
            basename.to_string()
        } else {
            format!("{}/{}", self.fullpath, basename)
        }
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::File && (self.mode & S_IFMT) == S_IFLNK
    }

    /// True iff this entry would be shown in a directory listing: observed
    /// in the current refresh generation and not tombstoned (§3 invariant).
    pub fn is_listing_visible(&self, parent_age: u64) -> bool {
        self.age == parent_age && !self.removed
    }
}

/// One entry in a formatted directory-buffer blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirBufEntry {
    pub name: String,
    pub ino: InodeId,
    pub kind: EntryKind,
}

/// Formats a directory-buffer blob: `.` and `..` (both bound to `self_ino`,
/// per §4.2 — reconstructing `..`'s true parent is the kernel adapter's
/// job) followed by the given children in order. The encoding itself is
/// opaque to callers; the only contract is that identical input produces
/// byte-identical output (§4.3, §8 invariant 5).
pub fn format_dir_buffer(self_ino: InodeId, children: &[DirBufEntry]) -> Vec<u8> {
    let mut entries = Vec::with_capacity(children.len() + 2);
    entries.push(DirBufEntry {
        name: ".".to_string(),
        ino: self_ino,
        kind: EntryKind::Directory,
    });
    entries.push(DirBufEntry {
        name: "..".to_string(),
        ino: self_ino,
        kind: EntryKind::Directory,
    });
    entries.extend_from_slice(children);
    serde_json::to_vec(&entries).expect("directory buffer entries are always serializable")
}
