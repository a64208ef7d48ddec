//! Error types for index, adapter, and query operations.

use thiserror::Error;

/// Errors raised by [`DocumentIndex`](crate::store::DocumentIndex) backends.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The named endpoint is not registered.
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    /// An endpoint with this name is already registered.
    #[error("Endpoint already exists: {0}")]
    EndpointExists(String),

    /// No document with this key exists.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// Backend storage failure (SQL, file layout).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Persisted state could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IndexError {
    /// True for errors describing an inconsistent request rather than a
    /// backend failure.
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            IndexError::EndpointNotFound(_)
                | IndexError::EndpointExists(_)
                | IndexError::DocumentNotFound(_)
        )
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::Serialization(err.to_string())
    }
}

/// Errors raised by endpoint adapters.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The endpoint could not be reached or the session could not be opened.
    #[error("Endpoint unreachable: {0}")]
    Connectivity(String),

    /// A page of the live listing could not be read or was malformed.
    #[error("Listing failed: {0}")]
    Listing(String),

    /// One document could not be fetched or decoded.
    #[error("Document '{id}' failed: {message}")]
    Document { id: String, message: String },

    /// The adapter was used without being opened.
    #[error("Adapter is not open")]
    Closed,
}

/// Parse or compile failure of a filter expression.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Invalid query at {position}: {message}")]
pub struct QueryError {
    pub position: usize,
    pub message: String,
}

impl QueryError {
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}
