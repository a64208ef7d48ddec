//! Configuration errors of the native layer.
//!
//! Index, adapter, and query errors live in `aasx_index_core::error`;
//! this module adds the failures that are decided at construction time.

use thiserror::Error;

use aasx_index_core::error::{AdapterError, IndexError};

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Unknown protocol '{0}'. Must be directory, package-server, opcua, or registry.")]
    UnknownProtocol(String),

    #[error("Invalid index URL '{url}': {reason}")]
    InvalidBackendUrl { url: String, reason: String },

    #[error("Endpoint '{0}' uses opcua but no OPC UA client is configured")]
    MissingOpcClient(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Failures of [`IndexService`](crate::service::IndexService) operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The endpoint failed its connectivity test and was not registered.
    #[error("Endpoint '{name}' is not reachable: {source}")]
    Unreachable {
        name: String,
        #[source]
        source: AdapterError,
    },
}
