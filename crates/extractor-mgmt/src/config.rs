//! Service configuration: cluster endpoints, export ceilings and retention.

use crate::client::ClusterKind;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CLUSTER_HOST: &str = "http://127.0.0.1:9200/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported config file extension: {0}")]
    UnsupportedExtension(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub app: AppConfig,
    pub snapshot: SnapshotClusterConfig,
    pub search: ClusterConfig,
    pub export: ExportConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bind: IpAddr,
    pub port: u16,
    /// Shared timeout for every outbound cluster request. Zero disables it.
    pub timeout_secs: u64,
    pub kibana: Option<String>,
}

/// Connection settings for one cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub host: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    /// PKCS#8 PEM key matching `client_cert`.
    pub client_key: Option<PathBuf>,
    pub insecure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SnapshotClusterConfig {
    #[serde(flatten)]
    pub cluster: ClusterConfig,
    /// Keep dot-prefixed system snapshots in listings.
    pub include_system: bool,
    /// The repository lives on object storage, so node disks do not bound restores.
    pub is_s3: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub scratch_dir: PathBuf,
    pub page_size: u64,
    pub max_rows: u64,
    pub max_bytes: u64,
    pub scroll_keepalive: String,
    /// UTC offset of the wall-clock dates submitted by the UI.
    pub input_utc_offset_secs: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub max_age_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            snapshot: SnapshotClusterConfig::default(),
            search: ClusterConfig::default(),
            export: ExportConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::from([0, 0, 0, 0]),
            port: 9400,
            timeout_secs: 30,
            kibana: None,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            host: String::from(DEFAULT_CLUSTER_HOST),
            username: None,
            password: None,
            ca_cert: None,
            client_cert: None,
            client_key: None,
            insecure: false,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            scratch_dir: PathBuf::from("/tmp/data"),
            page_size: 10_000,
            max_rows: 1_000_000,
            max_bytes: 2 * 1024 * 1024 * 1024,
            scroll_keepalive: String::from("10m"),
            input_utc_offset_secs: 3 * 3600,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 3600,
            sweep_interval_secs: 600,
        }
    }
}

impl ClusterConfig {
    /// Base URL with a guaranteed trailing slash so relative paths join below it.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let mut host = self.host.trim().to_string();
        if !host.ends_with('/') {
            host.push('/');
        }
        Url::parse(&host).map_err(|e| ConfigError::Invalid(format!("host {:?}: {}", self.host, e)))
    }

    /// Short name shown to operators, taken from the host part of the URL.
    pub fn display_name(&self) -> String {
        self.base_url()
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| self.host.clone())
    }

    fn matches_selector(&self, selector: &str) -> bool {
        let host = self.host.trim().trim_end_matches('/');
        selector.trim_end_matches('/') == host || selector == self.display_name()
    }
}

impl AppConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl RetentionConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl ExtractorConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: ExtractorConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            "yml" | "yaml" => serde_yaml::from_str(&contents)?,
            _ => return Err(ConfigError::UnsupportedExtension(ext.to_string())),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.snapshot.cluster.base_url()?;
        self.search.base_url()?;
        if self.export.page_size == 0 {
            return Err(ConfigError::Invalid("export.page_size must be positive".into()));
        }
        if self.retention.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "retention.sweep_interval_secs must be positive".into(),
            ));
        }
        for (name, cluster) in [("snapshot", &self.snapshot.cluster), ("search", &self.search)] {
            if cluster.client_cert.is_some() != cluster.client_key.is_some() {
                return Err(ConfigError::Invalid(format!(
                    "{name}: client_cert and client_key must be set together"
                )));
            }
        }
        Ok(())
    }

    pub fn cluster(&self, kind: ClusterKind) -> &ClusterConfig {
        match kind {
            ClusterKind::Snapshot => &self.snapshot.cluster,
            ClusterKind::Search => &self.search,
        }
    }

    /// Maps the UI's cluster selector onto a configured cluster.
    ///
    /// Accepts the cluster kind, the configured host URL or its display name.
    /// An empty selector means the Search cluster.
    pub fn resolve_cluster(&self, selector: &str) -> Option<ClusterKind> {
        let selector = selector.trim();
        if selector.is_empty() {
            return Some(ClusterKind::Search);
        }
        if let Some(kind) = ClusterKind::from_name(selector) {
            return Some(kind);
        }
        [ClusterKind::Snapshot, ClusterKind::Search]
            .into_iter()
            .find(|kind| self.cluster(*kind).matches_selector(selector))
    }
}
