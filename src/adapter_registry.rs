use async_trait::async_trait;
use serde::Deserialize;

use aasx_index_core::content::{AssetAdministrationShell, Environment, Submodel};
use aasx_index_core::error::AdapterError;
use aasx_index_core::models::{Endpoint, LiveDocument};
use aasx_index_core::scanner::{AdapterPage, EndpointAdapter, SessionCount};

use crate::adapters::{encode_id, get_json, live_document, page_query, DocumentFlags, PagedResult};

/// AAS registry: lists shell descriptors and follows their endpoint
/// `href`s to the shells and submodels.
pub struct RegistryAdapter {
    endpoint: Endpoint,
    base: String,
    client: reqwest::Client,
    page_limit: usize,
    sessions: SessionCount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShellDescriptor {
    id: String,
    #[serde(default)]
    endpoints: Vec<DescriptorEndpoint>,
    #[serde(default)]
    submodel_descriptors: Vec<SubmodelDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmodelDescriptor {
    #[serde(default)]
    endpoints: Vec<DescriptorEndpoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescriptorEndpoint {
    protocol_information: ProtocolInformation,
}

#[derive(Debug, Deserialize)]
struct ProtocolInformation {
    href: String,
}

fn first_href(endpoints: &[DescriptorEndpoint]) -> Option<&str> {
    endpoints
        .first()
        .map(|e| e.protocol_information.href.as_str())
}

impl RegistryAdapter {
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

    async fn list(
        &self,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<PagedResult<ShellDescriptor>, String> {
        let url = format!("{}/shell-descriptors", self.base);
        get_json(&self.client, &url, &page_query(limit, cursor)).await
    }
}

#[async_trait]
impl EndpointAdapter for RegistryAdapter {
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
        Ok(AdapterPage {
            ids: page.result.iter().map(|d| encode_id(&d.id)).collect(),
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

        let url = format!("{}/shell-descriptors/{}", self.base, address);
        let descriptor: ShellDescriptor = get_json(&self.client, &url, &[])
            .await
            .map_err(document_error)?;

        let shell_href = first_href(&descriptor.endpoints)
            .ok_or_else(|| document_error("shell descriptor has no endpoint".to_string()))?;
        let shell: AssetAdministrationShell = get_json(&self.client, shell_href, &[])
            .await
            .map_err(document_error)?;

        let mut submodels = Vec::new();
        for submodel in &descriptor.submodel_descriptors {
            let Some(href) = first_href(&submodel.endpoints) else {
                continue;
            };
            let submodel: Submodel = get_json(&self.client, href, &[])
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
                readonly: true,
                online_ready: false,
            },
        )
    }
}
