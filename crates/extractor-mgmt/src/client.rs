//! HTTP access to the two configured search-engine clusters.

use crate::config::{ClusterConfig, ConfigError, ExtractorConfig};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONNECTION, CONTENT_TYPE};
use reqwest::{Certificate, Identity, StatusCode, Url};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The named cluster a request is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterKind {
    /// Holds the snapshot repositories and receives restores.
    Snapshot,
    /// Serves searches and exports.
    Search,
}

impl ClusterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterKind::Snapshot => "Snapshot",
            ClusterKind::Search => "Search",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("snapshot") {
            Some(ClusterKind::Snapshot)
        } else if name.eq_ignore_ascii_case("search") {
            Some(ClusterKind::Search)
        } else {
            None
        }
    }
}

impl fmt::Display for ClusterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never got an answer: refused connection, DNS, timeout.
    #[error("{cluster} cluster unreachable: {msg}")]
    Transport { cluster: ClusterKind, msg: String },
    /// The cluster answered with a non-success status.
    #[error("{reason}")]
    Rejected { status: u16, reason: String },
    #[error("malformed response from {cluster} cluster: {msg}")]
    Malformed { cluster: ClusterKind, msg: String },
    #[error("cannot set up {cluster} client: {msg}")]
    Setup { cluster: ClusterKind, msg: String },
}

impl ClientError {
    pub fn malformed(cluster: ClusterKind, err: impl fmt::Display) -> Self {
        ClientError::Malformed {
            cluster,
            msg: err.to_string(),
        }
    }
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get(&self, cluster: ClusterKind, path: &str) -> Result<Bytes, ClientError>;
    async fn post(&self, cluster: ClusterKind, path: &str, body: &Value) -> Result<Bytes, ClientError>;
    async fn delete(&self, cluster: ClusterKind, path: &str) -> Result<Bytes, ClientError>;
}

/// Encodes a single path segment such as a repository, snapshot or scroll id.
pub fn segment(raw: &str) -> String {
    urlencoding::encode(raw).into_owned()
}

/// Message for a rejected POST: `error.reason`, a bare string `error`, or the status line.
pub fn rejection_reason(status: StatusCode, body: &[u8]) -> String {
    let decoded: Option<Value> = serde_json::from_slice(body).ok();
    let reason = decoded.as_ref().and_then(|doc| match doc.get("error") {
        Some(Value::Object(err)) => err.get("reason").and_then(Value::as_str).map(str::to_string),
        Some(Value::String(msg)) => Some(msg.clone()),
        _ => None,
    });
    reason.unwrap_or_else(|| status.to_string())
}

#[derive(Debug, Clone)]
struct Credentials {
    username: String,
    password: Option<String>,
}

/// One configured cluster endpoint.
#[derive(Debug, Clone)]
pub struct ClusterClient {
    kind: ClusterKind,
    base: Url,
    client: reqwest::Client,
    credentials: Option<Credentials>,
}

impl ClusterClient {
    pub fn new(
        kind: ClusterKind,
        config: &ClusterConfig,
        timeout: Option<Duration>,
    ) -> Result<Self, ClientError> {
        let setup = |msg: String| ClientError::Setup { cluster: kind, msg };

        let base = config
            .base_url()
            .map_err(|e: ConfigError| setup(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout).connect_timeout(timeout);
        }
        if let Some(ca) = &config.ca_cert {
            let pem = std::fs::read(ca).map_err(|e| setup(format!("{}: {}", ca.display(), e)))?;
            let cert = Certificate::from_pem(&pem).map_err(|e| setup(e.to_string()))?;
            builder = builder.add_root_certificate(cert);
        }
        if let (Some(cert), Some(key)) = (&config.client_cert, &config.client_key) {
            let cert_pem =
                std::fs::read(cert).map_err(|e| setup(format!("{}: {}", cert.display(), e)))?;
            let key_pem =
                std::fs::read(key).map_err(|e| setup(format!("{}: {}", key.display(), e)))?;
            let identity =
                Identity::from_pkcs8_pem(&cert_pem, &key_pem).map_err(|e| setup(e.to_string()))?;
            builder = builder.identity(identity);
        }
        if config.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().map_err(|e| setup(e.to_string()))?;

        let credentials = config.username.as_ref().map(|username| Credentials {
            username: username.clone(),
            password: config.password.clone(),
        });

        Ok(Self {
            kind,
            base,
            client,
            credentials,
        })
    }

    pub fn kind(&self) -> ClusterKind {
        self.kind
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| ClientError::Setup {
                cluster: self.kind,
                msg: format!("bad path {path:?}: {e}"),
            })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some(c) => request.basic_auth(&c.username, c.password.as_ref()),
            None => request,
        }
    }

    fn transport(&self, err: reqwest::Error) -> ClientError {
        ClientError::Transport {
            cluster: self.kind,
            msg: err.to_string(),
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        decode_reason: bool,
    ) -> Result<Bytes, ClientError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.transport(e))?;

        if status.is_success() {
            return Ok(body);
        }
        let reason = if decode_reason {
            rejection_reason(status, &body)
        } else {
            format!("wrong response: {}", status)
        };
        tracing::debug!(cluster = %self.kind, status = status.as_u16(), "request rejected: {}", reason);
        Err(ClientError::Rejected {
            status: status.as_u16(),
            reason,
        })
    }

    pub async fn get(&self, path: &str) -> Result<Bytes, ClientError> {
        let url = self.url(path)?;
        self.send(self.client.get(url), false).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Bytes, ClientError> {
        let url = self.url(path)?;
        self.send(self.client.post(url).json(body), true).await
    }

    pub async fn delete(&self, path: &str) -> Result<Bytes, ClientError> {
        let url = self.url(path)?;
        self.send(self.client.delete(url), false).await
    }
}

/// Both cluster clients behind the [`ClusterApi`] seam.
#[derive(Debug, Clone)]
pub struct Clusters {
    snapshot: ClusterClient,
    search: ClusterClient,
}

impl Clusters {
    pub fn new(snapshot: ClusterClient, search: ClusterClient) -> Self {
        Self { snapshot, search }
    }

    pub fn from_config(config: &ExtractorConfig) -> Result<Self, ClientError> {
        let timeout = config.app.request_timeout();
        Ok(Self {
            snapshot: ClusterClient::new(ClusterKind::Snapshot, &config.snapshot.cluster, timeout)?,
            search: ClusterClient::new(ClusterKind::Search, &config.search, timeout)?,
        })
    }

    pub fn client(&self, kind: ClusterKind) -> &ClusterClient {
        match kind {
            ClusterKind::Snapshot => &self.snapshot,
            ClusterKind::Search => &self.search,
        }
    }
}

#[async_trait]
impl ClusterApi for Clusters {
    async fn get(&self, cluster: ClusterKind, path: &str) -> Result<Bytes, ClientError> {
        self.client(cluster).get(path).await
    }

    async fn post(&self, cluster: ClusterKind, path: &str, body: &Value) -> Result<Bytes, ClientError> {
        self.client(cluster).post(path, body).await
    }

    async fn delete(&self, cluster: ClusterKind, path: &str) -> Result<Bytes, ClientError> {
        self.client(cluster).delete(path).await
    }
}
