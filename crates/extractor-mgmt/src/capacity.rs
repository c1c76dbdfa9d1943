//! Per-node disk statistics of the Snapshot cluster.

use crate::client::{ClientError, ClusterApi, ClusterKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub const CAT_NODES_PATH: &str = "_cat/nodes?format=json&bytes=b&h=ip,name,dt,du,dup,d&s=name";

#[derive(Debug, Error)]
pub enum CapacityError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("invalid node listing: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStat {
    pub ip: String,
    pub name: String,
    pub disk_total: i64,
    pub disk_used: i64,
    pub disk_used_percent: f64,
    pub disk_free: i64,
}

/// Free bytes per node in listing order, with their sum and maximum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacitySnapshot {
    free: Vec<i64>,
    sum: i64,
    max: i64,
}

impl CapacitySnapshot {
    pub fn from_free(free: Vec<i64>) -> Self {
        let sum = free.iter().fold(0i64, |acc, v| acc.saturating_add(*v));
        let max = free.iter().copied().max().unwrap_or(0);
        Self { free, sum, max }
    }

    pub fn from_nodes(nodes: &[NodeStat]) -> Self {
        Self::from_free(nodes.iter().map(|n| n.disk_free).collect())
    }

    pub fn free(&self) -> &[i64] {
        &self.free
    }

    pub fn sum(&self) -> i64 {
        self.sum
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    pub fn node_count(&self) -> usize {
        self.free.len()
    }
}

#[derive(Debug, Clone)]
pub struct NodeCapacity {
    pub nodes: Vec<NodeStat>,
    pub snapshot: CapacitySnapshot,
}

#[derive(Debug, Deserialize)]
struct CatNodeRow {
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    dt: Value,
    #[serde(default)]
    du: Value,
    #[serde(default)]
    dup: Value,
    #[serde(default)]
    d: Value,
}

// _cat values arrive as strings; nodes without a data path report null.
fn cat_number<T: std::str::FromStr + Default>(value: &Value, column: &str) -> Result<T, CapacityError> {
    let text = match value {
        Value::Null => return Ok(T::default()),
        Value::String(s) if s.trim().is_empty() => return Ok(T::default()),
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(CapacityError::Malformed(format!("column {column}: {other}")));
        }
    };
    text.parse::<T>()
        .map_err(|_| CapacityError::Malformed(format!("column {column}: {text:?}")))
}

pub fn parse_cat_nodes(body: &[u8]) -> Result<Vec<NodeStat>, CapacityError> {
    let rows: Vec<CatNodeRow> =
        serde_json::from_slice(body).map_err(|e| CapacityError::Malformed(e.to_string()))?;
    rows.into_iter()
        .map(|row| {
            Ok(NodeStat {
                ip: row.ip.unwrap_or_default(),
                name: row.name.unwrap_or_default(),
                disk_total: cat_number(&row.dt, "dt")?,
                disk_used: cat_number(&row.du, "du")?,
                disk_used_percent: cat_number(&row.dup, "dup")?,
                disk_free: cat_number(&row.d, "d")?,
            })
        })
        .collect()
}

pub struct NodeCapacityModel {
    api: Arc<dyn ClusterApi>,
}

impl NodeCapacityModel {
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api }
    }

    /// Fetches fresh node statistics. Nothing is cached between calls.
    pub async fn refresh(&self) -> Result<NodeCapacity, CapacityError> {
        let body = self.api.get(ClusterKind::Snapshot, CAT_NODES_PATH).await?;
        let nodes = parse_cat_nodes(&body)?;
        let snapshot = CapacitySnapshot::from_nodes(&nodes);
        tracing::debug!(
            nodes = snapshot.node_count(),
            free_sum = snapshot.sum(),
            free_max = snapshot.max(),
            "refreshed node capacity"
        );
        Ok(NodeCapacity { nodes, snapshot })
    }
}

pub fn format_bytes(bytes: i64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    const TB: f64 = GB * 1024.0;

    let value = bytes as f64;
    let abs = value.abs();
    if abs >= TB {
        format!("{:.2} TB", value / TB)
    } else if abs >= GB {
        format!("{:.2} GB", value / GB)
    } else if abs >= MB {
        format!("{:.2} MB", value / MB)
    } else if abs >= KB {
        format!("{:.2} KB", value / KB)
    } else {
        format!("{} B", bytes)
    }
}
