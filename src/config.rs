use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use aasx_index_core::models::Endpoint;

use crate::adapters::Protocol;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Embedded JSON index file.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    /// Relational backend connection string (`sqlite:...`). When absent
    /// the embedded backend is used.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            url: None,
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/aasx-index.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_expiry_secs")]
    pub expiry_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            page_size: default_page_size(),
            expiry_secs: default_expiry_secs(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl ScanConfig {
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_max_workers() -> usize {
    4
}
fn default_page_size() -> usize {
    100
}
fn default_expiry_secs() -> u64 {
    3600
}
fn default_interval_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// An endpoint seeded into the index on startup.
#[derive(Debug, Deserialize, Clone)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    pub protocol: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl EndpointConfig {
    pub fn to_endpoint(&self) -> Endpoint {
        Endpoint {
            name: self.name.clone(),
            url: self.url.clone(),
            protocol: self.protocol.clone(),
            version: self.version.clone(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.scan.max_workers == 0 {
        anyhow::bail!("scan.max_workers must be >= 1");
    }
    if config.scan.page_size == 0 {
        anyhow::bail!("scan.page_size must be >= 1");
    }

    let mut names = HashSet::new();
    for endpoint in &config.endpoints {
        if endpoint.name.trim().is_empty() {
            anyhow::bail!("endpoints[].name must not be empty");
        }
        if !names.insert(endpoint.name.as_str()) {
            anyhow::bail!("Duplicate endpoint name: '{}'", endpoint.name);
        }
        endpoint
            .protocol
            .parse::<Protocol>()
            .with_context(|| format!("Endpoint '{}'", endpoint.name))?;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = parse_config("").unwrap();
        assert_eq!(config.index.path, PathBuf::from("./data/aasx-index.json"));
        assert!(config.index.url.is_none());
        assert_eq!(config.scan.max_workers, 4);
        assert_eq!(config.scan.page_size, 100);
        assert_eq!(config.scan.expiry(), Duration::from_secs(3600));
        assert_eq!(config.logging.level, "info");
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = parse_config(
            r#"
[index]
path = "/tmp/idx.json"
url = "sqlite:/tmp/idx.sqlite"

[scan]
max_workers = 2
page_size = 10

[[endpoints]]
name = "samples"
url = "file:///srv/aasx"
protocol = "directory"

[[endpoints]]
name = "remote"
url = "http://localhost:5001/api/v3.0"
protocol = "package-server"
version = "3.0"
"#,
        )
        .unwrap();
        assert_eq!(config.index.url.as_deref(), Some("sqlite:/tmp/idx.sqlite"));
        assert_eq!(config.scan.max_workers, 2);
        assert_eq!(config.scan.interval_secs, 60);
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[1].to_endpoint().version.as_deref(), Some("3.0"));
    }

    #[test]
    fn test_validation_errors() {
        assert!(parse_config("[scan]\nmax_workers = 0").is_err());
        assert!(parse_config("[scan]\npage_size = 0").is_err());

        let duplicate = r#"
[[endpoints]]
name = "a"
url = "/x"
protocol = "directory"
[[endpoints]]
name = "a"
url = "/y"
protocol = "directory"
"#;
        assert!(parse_config(duplicate).is_err());

        let unknown = r#"
[[endpoints]]
name = "a"
url = "ftp://x"
protocol = "ftp"
"#;
        let err = parse_config(unknown).unwrap_err();
        assert!(format!("{:#}", err).contains("Unknown protocol"));
    }
}
