use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use aasx_index_core::content::Environment;
use aasx_index_core::error::AdapterError;
use aasx_index_core::models::{Endpoint, LiveDocument};
use aasx_index_core::scanner::{AdapterPage, EndpointAdapter, SessionCount};

use crate::adapters::{live_document, DocumentFlags};

const INCLUDE_GLOBS: &[&str] = &["**/*.aasx", "**/*.json"];
const EXCLUDE_GLOBS: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];
const MAX_JSON_PART_BYTES: u64 = 64 * 1024 * 1024;

/// Local directory of `.aasx` packages and JSON environment files.
///
/// Listing addresses are paths relative to the root. The whole directory
/// is reported as one page.
pub struct DirectoryAdapter {
    endpoint: Endpoint,
    root: PathBuf,
    sessions: SessionCount,
}

impl DirectoryAdapter {
    pub fn new(endpoint: Endpoint) -> Self {
        let root = root_path(&endpoint.url);
        Self {
            endpoint,
            root,
            sessions: SessionCount::default(),
        }
    }

    fn check_root(&self) -> Result<(), AdapterError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(AdapterError::Connectivity(format!(
                "directory does not exist: {}",
                self.root.display()
            )))
        }
    }
}

/// Directory path of a `file://` URL or plain path.
pub fn root_path(url: &str) -> PathBuf {
    PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
}

#[async_trait]
impl EndpointAdapter for DirectoryAdapter {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn open(&mut self) -> Result<(), AdapterError> {
        if self.sessions.is_open() {
            self.sessions.acquire();
            return Ok(());
        }
        self.check_root()?;
        self.sessions.acquire();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), AdapterError> {
        self.sessions.release();
        Ok(())
    }

    async fn test_connectivity(&mut self) -> Result<(), AdapterError> {
        self.check_root()
    }

    async fn next_page(&mut self, _cursor: Option<&str>) -> Result<AdapterPage, AdapterError> {
        if !self.sessions.is_open() {
            return Err(AdapterError::Closed);
        }
        let ids = scan_directory(&self.root).map_err(AdapterError::Listing)?;
        Ok(AdapterPage { ids, next: None })
    }

    async fn fetch_document(&mut self, address: &str) -> Result<LiveDocument, AdapterError> {
        if !self.sessions.is_open() {
            return Err(AdapterError::Closed);
        }
        let document_error = |message: String| AdapterError::Document {
            id: address.to_string(),
            message,
        };

        let path = self.root.join(address);
        let metadata = std::fs::metadata(&path).map_err(|e| document_error(e.to_string()))?;
        let bytes = std::fs::read(&path).map_err(|e| document_error(e.to_string()))?;
        let content = if address.to_ascii_lowercase().ends_with(".aasx") {
            read_package(&bytes).map_err(document_error)?
        } else {
            serde_json::from_slice::<Environment>(&bytes)
                .map_err(|e| document_error(e.to_string()))?
        };

        live_document(
            &self.endpoint,
            address,
            content,
            DocumentFlags {
                readonly: metadata.permissions().readonly(),
                online_ready: false,
            },
        )
    }
}

/// Relative paths of all candidate files below `root`, sorted.
pub fn scan_directory(root: &Path) -> Result<Vec<String>, String> {
    let include_set = build_globset(INCLUDE_GLOBS)?;
    let exclude_set = build_globset(EXCLUDE_GLOBS)?;

    let mut ids = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| e.to_string())?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        ids.push(rel_str);
    }

    ids.sort();
    Ok(ids)
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet, String> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| e.to_string())?);
    }
    builder.build().map_err(|e| e.to_string())
}

/// Reads the JSON environment part of an `.aasx` package.
pub fn read_package(bytes: &[u8]) -> Result<Environment, String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| e.to_string())?;

    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(|e| e.to_string())?;
        let name = entry.name().to_ascii_lowercase();
        if !name.ends_with(".json") || name.starts_with("[content_types]") {
            continue;
        }
        let mut part = Vec::new();
        entry
            .take(MAX_JSON_PART_BYTES)
            .read_to_end(&mut part)
            .map_err(|e| e.to_string())?;
        if part.len() as u64 >= MAX_JSON_PART_BYTES {
            return Err(format!("package part {} exceeds size limit", name));
        }
        return serde_json::from_slice(&part).map_err(|e| format!("{}: {}", name, e));
    }

    Err("package contains no JSON environment part".to_string())
}
