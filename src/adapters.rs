//! Endpoint adapter factory and helpers shared by the protocol adapters.
//!
//! | Protocol | Adapter |
//! |----------|---------|
//! | `directory` | [`DirectoryAdapter`](crate::adapter_dir::DirectoryAdapter) |
//! | `package-server` | [`PackageServerAdapter`](crate::adapter_package::PackageServerAdapter) |
//! | `opcua` | [`OpcUaAdapter`](crate::adapter_opc::OpcUaAdapter) |
//! | `registry` | [`RegistryAdapter`](crate::adapter_registry::RegistryAdapter) |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::error;

use aasx_index_core::checksum::compute_checksum;
use aasx_index_core::content::Environment;
use aasx_index_core::error::AdapterError;
use aasx_index_core::models::{now_millis, DocumentDescriptor, Endpoint, LiveDocument};
use aasx_index_core::scanner::EndpointAdapter;

use crate::adapter_dir::DirectoryAdapter;
use crate::adapter_opc::{OpcClient, OpcUaAdapter};
use crate::adapter_package::PackageServerAdapter;
use crate::adapter_registry::RegistryAdapter;
use crate::error::ConfigurationError;

/// Page size requested from servers that paginate their listings.
pub const DEFAULT_PAGE_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Directory,
    PackageServer,
    OpcUa,
    Registry,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Directory => "directory",
            Protocol::PackageServer => "package-server",
            Protocol::OpcUa => "opcua",
            Protocol::Registry => "registry",
        }
    }
}

impl FromStr for Protocol {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "directory" => Ok(Protocol::Directory),
            "package-server" => Ok(Protocol::PackageServer),
            "opcua" => Ok(Protocol::OpcUa),
            "registry" => Ok(Protocol::Registry),
            _ => Err(ConfigurationError::UnknownProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds adapters for endpoints by protocol.
///
/// Holds the shared HTTP client and the optional OPC UA client; adapters
/// are cheap to create and are built per task.
#[derive(Clone)]
pub struct AdapterFactory {
    http: reqwest::Client,
    opc_client: Option<Arc<dyn OpcClient>>,
    page_limit: usize,
}

impl AdapterFactory {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            opc_client: None,
            page_limit: DEFAULT_PAGE_LIMIT,
        }
    }

    pub fn with_opc_client(mut self, client: Arc<dyn OpcClient>) -> Self {
        self.opc_client = Some(client);
        self
    }

    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = limit.max(1);
        self
    }

    pub fn create(&self, endpoint: &Endpoint) -> Result<Box<dyn EndpointAdapter>, ConfigurationError> {
        let protocol = endpoint.protocol.parse::<Protocol>().inspect_err(|e| {
            error!(endpoint = %endpoint.name, error = %e, "cannot build adapter");
        })?;

        Ok(match protocol {
            Protocol::Directory => Box::new(DirectoryAdapter::new(endpoint.clone())),
            Protocol::PackageServer => Box::new(PackageServerAdapter::new(
                endpoint.clone(),
                self.http.clone(),
                self.page_limit,
            )),
            Protocol::Registry => Box::new(RegistryAdapter::new(
                endpoint.clone(),
                self.http.clone(),
                self.page_limit,
            )),
            Protocol::OpcUa => {
                let client = self.opc_client.clone().ok_or_else(|| {
                    let e = ConfigurationError::MissingOpcClient(endpoint.name.clone());
                    error!(endpoint = %endpoint.name, error = %e, "cannot build adapter");
                    e
                })?;
                Box::new(OpcUaAdapter::new(endpoint.clone(), client))
            }
        })
    }
}

impl Default for AdapterFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes an AAS identifier for use in a URL path.
pub fn encode_id(id: &str) -> String {
    URL_SAFE_NO_PAD.encode(id)
}

pub fn decode_id(encoded: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .ok()?;
    String::from_utf8(bytes).ok()
}

/// Flags of a live document that depend on the adapter rather than the
/// content.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentFlags {
    pub readonly: bool,
    pub online_ready: bool,
}

/// Builds the live descriptor for an environment fetched at `address`.
pub fn live_document(
    endpoint: &Endpoint,
    address: &str,
    content: Environment,
    flags: DocumentFlags,
) -> Result<LiveDocument, AdapterError> {
    let shell = content.shell().ok_or_else(|| AdapterError::Document {
        id: address.to_string(),
        message: "environment contains no asset administration shell".to_string(),
    })?;

    let descriptor = DocumentDescriptor {
        endpoint: endpoint.name.clone(),
        id: shell.id.clone(),
        id_short: shell.id_short.clone(),
        address: address.to_string(),
        checksum: compute_checksum(&content),
        timestamp: now_millis(),
        readonly: flags.readonly,
        online_ready: flags.online_ready,
        parent_id: None,
        asset_id: shell.asset_information.global_asset_id.clone(),
        thumbnail: shell
            .asset_information
            .default_thumbnail
            .as_ref()
            .map(|t| t.path.clone()),
    };

    Ok(LiveDocument {
        descriptor,
        content: Some(content),
    })
}

/// `paging_metadata` of the AAS HTTP API.
#[derive(Debug, Default, Deserialize)]
pub struct PagingMetadata {
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Paged result envelope of the AAS HTTP API.
#[derive(Debug, Deserialize)]
pub struct PagedResult<T> {
    #[serde(default = "Vec::new")]
    pub result: Vec<T>,
    #[serde(default)]
    pub paging_metadata: PagingMetadata,
}

/// GETs `url` and decodes a JSON body; non-2xx statuses are errors.
pub async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, String)],
) -> Result<T, String> {
    let resp = client
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| format!("GET {} failed: {}", url, e))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(format!(
            "GET {} failed (HTTP {}): {}",
            url,
            status,
            body.chars().take(200).collect::<String>()
        ));
    }

    resp.json::<T>()
        .await
        .map_err(|e| format!("GET {} returned malformed JSON: {}", url, e))
}

/// Listing query parameters for a paginated AAS API resource.
pub fn page_query(limit: usize, cursor: Option<&str>) -> Vec<(&'static str, String)> {
    let mut query = vec![("limit", limit.to_string())];
    if let Some(cursor) = cursor {
        query.push(("cursor", cursor.to_string()));
    }
    query
}
