//! Test harness: an in-memory cluster backend and scratch-directory setup

use async_trait::async_trait;
use bytes::Bytes;
use extractor_mgmt::client::{ClientError, ClusterApi, ClusterKind};
use extractor_mgmt::config::ExtractorConfig;
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;

#[derive(Debug)]
pub struct TestEnv {
    temp_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            temp_dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    pub fn scratch(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Default config pointed at this environment's scratch directory.
    pub fn config(&self) -> ExtractorConfig {
        let mut config = ExtractorConfig::default();
        config.export.scratch_dir = self.scratch().to_path_buf();
        config
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub enum MockReply {
    Json(Value),
    /// Body sent verbatim, for replies that are not valid JSON.
    Raw(String),
    Reject { status: u16, reason: String },
    Unreachable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub cluster: ClusterKind,
    pub method: &'static str,
    pub path: String,
    pub body: Option<Value>,
}

struct Route {
    method: &'static str,
    prefix: String,
    replies: Vec<MockReply>,
    served: usize,
}

/// Scripted [`ClusterApi`]. The longest matching path prefix answers; a route
/// with several replies serves them in order and then repeats the last one.
#[derive(Default)]
pub struct MockCluster {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, method: &'static str, prefix: &str, reply: MockReply) -> Self {
        self.sequence(method, prefix, vec![reply])
    }

    pub fn json(self, method: &'static str, prefix: &str, body: Value) -> Self {
        self.on(method, prefix, MockReply::Json(body))
    }

    pub fn sequence(self, method: &'static str, prefix: &str, replies: Vec<MockReply>) -> Self {
        assert!(!replies.is_empty(), "route needs at least one reply");
        self.routes.lock().unwrap().push(Route {
            method,
            prefix: prefix.to_string(),
            replies,
            served: 0,
        });
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method && c.path.starts_with(prefix))
            .count()
    }

    fn answer(
        &self,
        cluster: ClusterKind,
        method: &'static str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Bytes, ClientError> {
        self.calls.lock().unwrap().push(RecordedCall {
            cluster,
            method,
            path: path.to_string(),
            body: body.cloned(),
        });

        let mut routes = self.routes.lock().unwrap();
        let route = routes
            .iter_mut()
            .filter(|r| r.method == method && path.starts_with(&r.prefix))
            .max_by_key(|r| r.prefix.len());
        let Some(route) = route else {
            return Err(ClientError::Rejected {
                status: 404,
                reason: String::from("wrong response: 404 Not Found"),
            });
        };
        let reply = route.replies[route.served.min(route.replies.len() - 1)].clone();
        route.served += 1;

        match reply {
            MockReply::Json(value) => Ok(Bytes::from(value.to_string())),
            MockReply::Raw(body) => Ok(Bytes::from(body)),
            MockReply::Reject { status, reason } => Err(ClientError::Rejected { status, reason }),
            MockReply::Unreachable => Err(ClientError::Transport {
                cluster,
                msg: String::from("connection refused"),
            }),
        }
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn get(&self, cluster: ClusterKind, path: &str) -> Result<Bytes, ClientError> {
        self.answer(cluster, "GET", path, None)
    }

    async fn post(&self, cluster: ClusterKind, path: &str, body: &Value) -> Result<Bytes, ClientError> {
        self.answer(cluster, "POST", path, Some(body))
    }

    async fn delete(&self, cluster: ClusterKind, path: &str) -> Result<Bytes, ClientError> {
        self.answer(cluster, "DELETE", path, None)
    }
}
