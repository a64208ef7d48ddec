use std::sync::Arc;

use async_trait::async_trait;

use aasx_index_core::content::Environment;
use aasx_index_core::error::AdapterError;
use aasx_index_core::models::{Endpoint, LiveDocument};
use aasx_index_core::scanner::{AdapterPage, EndpointAdapter, SessionCount};

use crate::adapters::{live_document, DocumentFlags};

/// OPC UA wire client. Sessions are identified by the server URL.
///
/// Implementations own the protocol stack; the adapter only sequences
/// connect, browse, read, and disconnect.
#[async_trait]
pub trait OpcClient: Send + Sync {
    async fn connect(&self, url: &str) -> Result<(), AdapterError>;

    async fn disconnect(&self, url: &str) -> Result<(), AdapterError>;

    /// Node ids of all shells exposed by the server.
    async fn browse_shells(&self, url: &str) -> Result<Vec<String>, AdapterError>;

    async fn read_environment(&self, url: &str, node: &str) -> Result<Environment, AdapterError>;
}

/// OPC UA server exposing shells through the AAS information model.
///
/// The server is browsed in one page. Documents are read live, so their
/// descriptors are `online_ready` and read-only.
pub struct OpcUaAdapter {
    endpoint: Endpoint,
    client: Arc<dyn OpcClient>,
    sessions: SessionCount,
}

impl OpcUaAdapter {
    pub fn new(endpoint: Endpoint, client: Arc<dyn OpcClient>) -> Self {
        Self {
            endpoint,
            client,
            sessions: SessionCount::default(),
        }
    }
}

#[async_trait]
impl EndpointAdapter for OpcUaAdapter {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn open(&mut self) -> Result<(), AdapterError> {
        if !self.sessions.is_open() {
            self.client.connect(&self.endpoint.url).await?;
        }
        self.sessions.acquire();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), AdapterError> {
        if self.sessions.release() {
            self.client.disconnect(&self.endpoint.url).await?;
        }
        Ok(())
    }

    async fn test_connectivity(&mut self) -> Result<(), AdapterError> {
        if self.sessions.is_open() {
            return Ok(());
        }
        self.client.connect(&self.endpoint.url).await?;
        self.client.disconnect(&self.endpoint.url).await
    }

    async fn next_page(&mut self, _cursor: Option<&str>) -> Result<AdapterPage, AdapterError> {
        if !self.sessions.is_open() {
            return Err(AdapterError::Closed);
        }
        let ids = self.client.browse_shells(&self.endpoint.url).await?;
        Ok(AdapterPage { ids, next: None })
    }

    async fn fetch_document(&mut self, address: &str) -> Result<LiveDocument, AdapterError> {
        if !self.sessions.is_open() {
            return Err(AdapterError::Closed);
        }
        let content = self
            .client
            .read_environment(&self.endpoint.url, address)
            .await
            .map_err(|e| match e {
                AdapterError::Document { .. } => e,
                other => AdapterError::Document {
                    id: address.to_string(),
                    message: other.to_string(),
                },
            })?;
        live_document(
            &self.endpoint,
            address,
            content,
            DocumentFlags {
                readonly: true,
                online_ready: true,
            },
        )
    }
}
