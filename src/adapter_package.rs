use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use aasx_index_core::content::{AssetAdministrationShell, Environment, Submodel};
use aasx_index_core::error::AdapterError;
use aasx_index_core::models::{Endpoint, LiveDocument};
use aasx_index_core::scanner::{AdapterPage, EndpointAdapter, SessionCount};

use crate::adapters::{encode_id, get_json, live_document, page_query, DocumentFlags, PagedResult};

/// AAS package server speaking the AAS HTTP API (`/shells`, `/submodels`).
///
/// Listing addresses are base64url-encoded shell ids; the server's own
/// `paging_metadata.cursor` drives pagination.
pub struct PackageServerAdapter {
    endpoint: Endpoint,
    base: String,
    client: reqwest::Client,
    page_limit: usize,
    sessions: SessionCount,
}

#[derive(Debug, Deserialize)]
struct ShellId {
    id: String,
}

impl PackageServerAdapter {
    pub fn new(endpoint: Endpoint, client: reqwest::Client, page_limit: usize) -> Self {
        let base = endpoint.url.trim_end_matches('/').to_string();
        Self {
            endpoint,
            base,
            client,
            page_limit,
            sessions: SessionCount::default(),
        }
    }

    async fn list(&self, limit: usize, cursor: Option<&str>) -> Result<PagedResult<ShellId>, String> {
        let url = format!("{}/shells", self.base);
        get_json(&self.client, &url, &page_query(limit, cursor)).await
    }
}

#[async_trait]
impl EndpointAdapter for PackageServerAdapter {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn open(&mut self) -> Result<(), AdapterError> {
        if !self.sessions.is_open() {
            self.test_connectivity().await?;
        }
        self.sessions.acquire();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), AdapterError> {
        self.sessions.release();
        Ok(())
    }

    async fn test_connectivity(&mut self) -> Result<(), AdapterError> {
        self.list(1, None)
            .await
            .map(|_| ())
            .map_err(AdapterError::Connectivity)
    }

    async fn next_page(&mut self, cursor: Option<&str>) -> Result<AdapterPage, AdapterError> {
        if !self.sessions.is_open() {
            return Err(AdapterError::Closed);
        }
        let page = self
            .list(self.page_limit, cursor)
            .await
            .map_err(AdapterError::Listing)?;
        debug!(
            endpoint = %self.endpoint.name,
            count = page.result.len(),
            "package server page"
        );
        Ok(AdapterPage {
            ids: page.result.iter().map(|s| encode_id(&s.id)).collect(),
            next: page.paging_metadata.cursor.filter(|c| !c.is_empty()),
        })
    }

    async fn fetch_document(&mut self, address: &str) -> Result<LiveDocument, AdapterError> {
        if !self.sessions.is_open() {
            return Err(AdapterError::Closed);
        }
        let document_error = |message: String| AdapterError::Document {
            id: address.to_string(),
            message,
        };

        let shell_url = format!("{}/shells/{}", self.base, address);
        let shell: AssetAdministrationShell = get_json(&self.client, &shell_url, &[])
            .await
            .map_err(document_error)?;

        let mut submodels = Vec::new();
        for target in shell.submodels.iter().filter_map(|r| r.target()) {
            let url = format!("{}/submodels/{}", self.base, encode_id(target));
            let submodel: Submodel = get_json(&self.client, &url, &[])
                .await
                .map_err(document_error)?;
            submodels.push(submodel);
        }

        let content = Environment {
            asset_administration_shells: vec![shell],
            submodels,
        };
        live_document(
            &self.endpoint,
            address,
            content,
            DocumentFlags {
                readonly: false,
                online_ready: false,
            },
        )
    }
}
