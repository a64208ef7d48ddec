//! Index backend selection.
//!
//! A configured `[index].url` selects the relational backend; without one
//! (or with one that cannot be used) the embedded JSON-file backend at
//! `[index].path` is opened instead.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use aasx_index_core::store::DocumentIndex;

use crate::config::IndexConfig;
use crate::error::ConfigurationError;
use crate::file_index::FileIndex;
use crate::sqlite_index::SqliteIndex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    File(PathBuf),
    Sqlite(String),
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::File(path) => write!(f, "{}", path.display()),
            Backend::Sqlite(url) => write!(f, "{}", url),
        }
    }
}

/// Validates a relational connection string.
pub fn parse_backend_url(url: &str) -> Result<Backend, ConfigurationError> {
    let invalid = |reason: &str| ConfigurationError::InvalidBackendUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .ok_or_else(|| invalid("only sqlite: URLs are supported"))?;
    if rest.trim().is_empty() {
        return Err(invalid("missing database path"));
    }
    Ok(Backend::Sqlite(url.to_string()))
}

/// Chooses the backend for `config`, logging and falling back to the
/// embedded file when the URL is unusable.
pub fn select_backend(config: &IndexConfig) -> Backend {
    match config.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        None => Backend::File(config.path.clone()),
        Some(url) => parse_backend_url(url).unwrap_or_else(|e| {
            error!(error = %e, path = %config.path.display(), "falling back to embedded index");
            Backend::File(config.path.clone())
        }),
    }
}

pub async fn open_index(config: &IndexConfig) -> Result<(Backend, Arc<dyn DocumentIndex>)> {
    let backend = select_backend(config);
    let index: Arc<dyn DocumentIndex> = match &backend {
        Backend::File(path) => Arc::new(
            FileIndex::open(path)
                .with_context(|| format!("Failed to open index file: {}", path.display()))?,
        ),
        Backend::Sqlite(url) => Arc::new(
            SqliteIndex::open(url)
                .await
                .with_context(|| format!("Failed to open index database: {}", url))?,
        ),
    };
    info!(backend = %backend, "index opened");
    Ok((backend, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: Option<&str>) -> IndexConfig {
        IndexConfig {
            path: PathBuf::from("/tmp/idx.json"),
            url: url.map(str::to_string),
        }
    }

    #[test]
    fn test_backend_selection() {
        assert_eq!(
            select_backend(&config(None)),
            Backend::File(PathBuf::from("/tmp/idx.json"))
        );
        assert_eq!(
            select_backend(&config(Some("sqlite:/tmp/x.sqlite"))),
            Backend::Sqlite("sqlite:/tmp/x.sqlite".into())
        );
        assert_eq!(
            select_backend(&config(Some("postgres://db/x"))),
            Backend::File(PathBuf::from("/tmp/idx.json"))
        );
        assert_eq!(
            select_backend(&config(Some("sqlite:"))),
            Backend::File(PathBuf::from("/tmp/idx.json"))
        );
        assert_eq!(
            select_backend(&config(Some("  "))),
            Backend::File(PathBuf::from("/tmp/idx.json"))
        );
    }

    #[test]
    fn test_invalid_url_error() {
        let err = parse_backend_url("mysql://x").unwrap_err();
        assert!(err.to_string().contains("mysql://x"));
    }
}
