//! Embedded backend: a [`MemoryIndex`] persisted to one JSON file.
//!
//! The whole file (endpoints, documents, element rows) is loaded on open
//! and rewritten atomically after every mutation through a temp file in
//! the same directory. Mutations are serialized; reads go straight to the
//! in-memory state. A mutation whose write fails is rolled back, so memory
//! never runs ahead of the file.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use aasx_index_core::error::IndexError;
use aasx_index_core::models::{Cursor, DocumentDescriptor, DocumentKey, ElementRow, Endpoint, Page};
use aasx_index_core::store::memory::{IndexSnapshot, MemoryIndex};
use aasx_index_core::store::DocumentIndex;

pub struct FileIndex {
    path: PathBuf,
    memory: MemoryIndex,
    writer: Mutex<()>,
}

impl FileIndex {
    /// Loads `path`, creating an empty index file when it does not exist.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let snapshot = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            if content.trim().is_empty() {
                IndexSnapshot::default()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            IndexSnapshot::default()
        };

        if !path.exists() {
            write_snapshot(path, &snapshot)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            memory: MemoryIndex::from_snapshot(snapshot),
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the current state off the async threads. On failure the
    /// in-memory state is reset to `before`.
    async fn persist(&self, before: IndexSnapshot) -> Result<(), IndexError> {
        let path = self.path.clone();
        let snapshot = self.memory.snapshot();
        let written = tokio::task::spawn_blocking(move || write_snapshot(&path, &snapshot))
            .await
            .map_err(|e| IndexError::Storage(format!("index writer panicked: {}", e)))
            .and_then(|result| result);

        if let Err(e) = &written {
            warn!(path = %self.path.display(), error = %e, "index file write failed, rolling back");
            self.memory.restore(before);
        }
        written
    }
}

fn write_snapshot(path: &Path, snapshot: &IndexSnapshot) -> Result<(), IndexError> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => dir.to_path_buf(),
        None => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let body = serde_json::to_vec(snapshot)?;
    let mut file = NamedTempFile::new_in(&dir)?;
    file.write_all(&body)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| IndexError::Io(e.error))?;
    debug!(path = %path.display(), bytes = body.len(), "index file written");
    Ok(())
}

#[async_trait]
impl DocumentIndex for FileIndex {
    async fn get_page(
        &self,
        endpoint: Option<&str>,
        cursor: &Cursor,
    ) -> Result<Page<DocumentDescriptor>, IndexError> {
        self.memory.get_page(endpoint, cursor).await
    }

    async fn query(
        &self,
        cursor: &Cursor,
        filter: Option<&str>,
        language: Option<&str>,
    ) -> Result<Page<DocumentDescriptor>, IndexError> {
        self.memory.query(cursor, filter, language).await
    }

    async fn find(
        &self,
        endpoint: Option<&str>,
        id: &str,
    ) -> Result<Option<DocumentDescriptor>, IndexError> {
        self.memory.find(endpoint, id).await
    }

    async fn upsert(
        &self,
        descriptor: &DocumentDescriptor,
        rows: Option<&[ElementRow]>,
    ) -> Result<(), IndexError> {
        let _guard = self.writer.lock().await;
        let before = self.memory.snapshot();
        self.memory.upsert(descriptor, rows).await?;
        self.persist(before).await
    }

    async fn remove(&self, endpoint: Option<&str>, id: Option<&str>) -> Result<bool, IndexError> {
        let _guard = self.writer.lock().await;
        let before = self.memory.snapshot();
        let removed = self.memory.remove(endpoint, id).await?;
        if removed {
            self.persist(before).await?;
        }
        Ok(removed)
    }

    async fn list_endpoint_documents(
        &self,
        endpoint: &str,
    ) -> Result<Vec<DocumentDescriptor>, IndexError> {
        self.memory.list_endpoint_documents(endpoint).await
    }

    async fn element_rows(&self, key: &DocumentKey) -> Result<Vec<ElementRow>, IndexError> {
        self.memory.element_rows(key).await
    }

    async fn endpoints(&self) -> Result<Vec<Endpoint>, IndexError> {
        self.memory.endpoints().await
    }

    async fn find_endpoint(&self, name: &str) -> Result<Option<Endpoint>, IndexError> {
        self.memory.find_endpoint(name).await
    }

    async fn add_endpoint(&self, endpoint: &Endpoint) -> Result<(), IndexError> {
        let _guard = self.writer.lock().await;
        let before = self.memory.snapshot();
        self.memory.add_endpoint(endpoint).await?;
        self.persist(before).await
    }

    async fn remove_endpoint(&self, name: &str) -> Result<(), IndexError> {
        let _guard = self.writer.lock().await;
        let before = self.memory.snapshot();
        self.memory.remove_endpoint(name).await?;
        self.persist(before).await
    }
}
