//! Async trait contracts for the four external collaborators named in §6.4:
//! the HTTP connection pool + connection (merged — see DESIGN.md), the
//! on-disk block cache, and the per-open-file I/O handle. Production
//! implementations live outside this crate; `mock.rs` provides canned
//! implementations for tests.

use async_trait::async_trait;
use std::time::SystemTime;

/// Result of a HEAD probe against the object store.
#[derive(Debug, Clone)]
pub struct HeadResponse {
    pub size: u64,
    pub last_modified: SystemTime,
    pub etag: Option<String>,
    pub version_id: Option<String>,
    pub content_type: Option<String>,
}

/// One row of a directory listing response (§6.2).
#[derive(Debug, Clone)]
pub struct ListedEntry {
    pub basename: String,
    pub size: u64,
    pub last_modified: SystemTime,
    pub is_prefix: bool,
}

/// The object-store wire protocol (§6.2): HEAD, DELETE, copy-PUT, listing.
/// Acquiring a pooled connection and dispatching a request collapse into a
/// single `.await` per call under async/await, so the pool itself is not a
/// separate trait (see DESIGN.md's note on Open Question resolution).
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn head(&self, path: &str) -> crate::error::Result<HeadResponse>;
    async fn delete(&self, path: &str) -> crate::error::Result<()>;
    async fn put_copy(
        &self,
        new_path: &str,
        copy_source: &str,
        storage_class: &str,
    ) -> crate::error::Result<()>;
    async fn list(&self, path: &str) -> crate::error::Result<Vec<ListedEntry>>;
}

/// The on-disk block cache for file payloads (§6.4). The tree consults it
/// only for the length of locally-buffered-but-not-yet-flushed writes; it
/// never reads or writes payload bytes directly.
#[async_trait]
pub trait BlockCache: Send + Sync {
    async fn file_length(&self, ino: u64) -> Option<u64>;
    async fn remove_file(&self, ino: u64);
}

/// A single open file's I/O surface (§6.4). One handle is obtained per
/// `open`/`create` and released on `release`.
#[async_trait]
pub trait FileIoHandle: Send + Sync {
    async fn read(&self, offset: u64, len: u32) -> crate::error::Result<Vec<u8>>;
    async fn write(&self, offset: u64, buf: &[u8]) -> crate::error::Result<usize>;
    async fn simple_upload(&self, path: &str, content: &[u8], mode: u32) -> crate::error::Result<()>;
    async fn simple_download(&self, path: &str) -> crate::error::Result<Vec<u8>>;
}

/// Opens per-inode file I/O handles on demand. Production backends hand out
/// handles backed by a real descriptor pool; the mock hands out in-memory
/// buffers.
#[async_trait]
pub trait FileIoFactory: Send + Sync {
    async fn open(&self, ino: u64, path: &str) -> crate::error::Result<Box<dyn FileIoHandle>>;
}

/// Bundles the three server-touching collaborator traits a tree needs.
pub trait Backend: HttpBackend + BlockCache + FileIoFactory {}
impl<T: HttpBackend + BlockCache + FileIoFactory> Backend for T {}
