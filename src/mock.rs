//! In-memory scriptable stand-ins for the four collaborator traits, used by
//! integration tests (`tests/scenarios.rs`) and the colocated unit tests
//! throughout this crate. Not part of the public API surface a production
//! embedder would use.

use crate::collaborators::{BlockCache, FileIoFactory, FileIoHandle, HeadResponse, HttpBackend, ListedEntry};
use crate::error::{Result, TreeError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

#[derive(Default)]
struct MockState {
    heads: HashMap<String, HeadResponse>,
    listings: HashMap<String, Vec<ListedEntry>>,
    deleted: Vec<String>,
    copies: Vec<(String, String, String)>,
    block_cache_lengths: HashMap<u64, u64>,
    block_cache_removed: Vec<u64>,
}

/// A backend whose HEAD/list/delete/copy responses are scripted ahead of
/// time by a test, and whose file payloads live entirely in memory, shared
/// across every handle opened for the same path (so a payload uploaded
/// through one `open()` call is visible to the next).
pub struct MockBackend {
    state: Mutex<MockState>,
    uploads: Arc<StdMutex<HashMap<String, Vec<u8>>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        MockBackend {
            state: Mutex::new(MockState::default()),
            uploads: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub async fn put_head(&self, path: &str, head: HeadResponse) {
        self.state.lock().await.heads.insert(path.to_string(), head);
    }

    pub async fn set_listing(&self, path: &str, entries: Vec<ListedEntry>) {
        self.state.lock().await.listings.insert(path.to_string(), entries);
    }

    pub async fn deleted_paths(&self) -> Vec<String> {
        self.state.lock().await.deleted.clone()
    }

    pub async fn copies(&self) -> Vec<(String, String, String)> {
        self.state.lock().await.copies.clone()
    }

    pub async fn set_block_cache_length(&self, ino: u64, len: u64) {
        self.state.lock().await.block_cache_lengths.insert(ino, len);
    }

    pub async fn block_cache_removed_inos(&self) -> Vec<u64> {
        self.state.lock().await.block_cache_removed.clone()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpBackend for MockBackend {
    async fn head(&self, path: &str) -> Result<HeadResponse> {
        self.state
            .lock()
            .await
            .heads
            .get(path)
            .cloned()
            .ok_or_else(|| TreeError::Remote(format!("no such key: {path}")))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.heads.remove(path);
        state.deleted.push(path.to_string());
        Ok(())
    }

    async fn put_copy(&self, new_path: &str, copy_source: &str, storage_class: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let head = state
            .heads
            .get(copy_source)
            .cloned()
            .ok_or_else(|| TreeError::Remote(format!("copy source missing: {copy_source}")))?;
        state.heads.insert(new_path.to_string(), head);
        state
            .copies
            .push((new_path.to_string(), copy_source.to_string(), storage_class.to_string()));
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<ListedEntry>> {
        Ok(self.state.lock().await.listings.get(path).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl BlockCache for MockBackend {
    async fn file_length(&self, ino: u64) -> Option<u64> {
        self.state.lock().await.block_cache_lengths.get(&ino).copied()
    }

    async fn remove_file(&self, ino: u64) {
        let mut state = self.state.lock().await;
        state.block_cache_lengths.remove(&ino);
        state.block_cache_removed.push(ino);
    }
}

struct MockFileIoHandle {
    path: String,
    uploads: Arc<StdMutex<HashMap<String, Vec<u8>>>>,
}

#[async_trait]
impl FileIoHandle for MockFileIoHandle {
    async fn read(&self, offset: u64, len: u32) -> Result<Vec<u8>> {
        let uploads = self.uploads.lock().unwrap();
        let buf = uploads.get(&self.path).cloned().unwrap_or_default();
        let start = (offset as usize).min(buf.len());
        let end = (start + len as usize).min(buf.len());
        Ok(buf[start..end].to_vec())
    }

    async fn write(&self, offset: u64, data: &[u8]) -> Result<usize> {
        let mut uploads = self.uploads.lock().unwrap();
        let buf = uploads.entry(self.path.clone()).or_default();
        let end = offset as usize + data.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[offset as usize..end].copy_from_slice(data);
        Ok(data.len())
    }

    async fn simple_upload(&self, _path: &str, content: &[u8], _mode: u32) -> Result<()> {
        self.uploads.lock().unwrap().insert(self.path.clone(), content.to_vec());
        Ok(())
    }

    async fn simple_download(&self, _path: &str) -> Result<Vec<u8>> {
        Ok(self.uploads.lock().unwrap().get(&self.path).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl FileIoFactory for MockBackend {
    async fn open(&self, _ino: u64, path: &str) -> Result<Box<dyn FileIoHandle>> {
        Ok(Box::new(MockFileIoHandle {
            path: path.to_string(),
            uploads: self.uploads.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[tokio::test]
    async fn head_returns_scripted_response() {
        let backend = MockBackend::new();
        backend
            .put_head(
                "a.txt",
                HeadResponse {
                    size: 3,
                    last_modified: SystemTime::now(),
                    etag: Some("e1".into()),
                    version_id: None,
                    content_type: None,
                },
            )
            .await;
        let head = backend.head("a.txt").await.unwrap();
        assert_eq!(head.size, 3);
    }

    #[tokio::test]
    async fn head_of_unknown_path_is_remote_error() {
        let backend = MockBackend::new();
        assert!(backend.head("missing").await.is_err());
    }

    #[tokio::test]
    async fn put_copy_then_delete_moves_the_head_entry() {
        let backend = MockBackend::new();
        backend
            .put_head(
                "old",
                HeadResponse {
                    size: 1,
                    last_modified: SystemTime::now(),
                    etag: None,
                    version_id: None,
                    content_type: None,
                },
            )
            .await;
        backend.put_copy("new", "old", "STANDARD").await.unwrap();
        backend.delete("old").await.unwrap();
        assert!(backend.head("new").await.is_ok());
        assert!(backend.head("old").await.is_err());
        assert_eq!(backend.deleted_paths().await, vec!["old".to_string()]);
    }

    #[tokio::test]
    async fn file_io_handle_read_after_write_round_trips() {
        let backend = MockBackend::new();
        let handle = FileIoFactory::open(&backend, 5, "f.txt").await.unwrap();
        handle.write(0, b"hello").await.unwrap();
        let read = handle.read(0, 5).await.unwrap();
        assert_eq!(read, b"hello");
    }
}
