//! Capacity-aware restore planning.
//!
//! An index is restored right away only when the free space of the Snapshot
//! cluster's nodes can hold more copies of its shards than it has shards.
//! Everything else is reported back as deferred and never sent to the cluster.

use crate::capacity::{CapacityError, CapacitySnapshot, NodeCapacityModel};
use crate::client::{segment, ClientError, ClusterApi, ClusterKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

pub const HEALTH_PATH: &str = "_cluster/health/extracted*";
pub const BUSY_SHARD_THRESHOLD: u64 = 5;
pub const RESTORED_PREFIX: &str = "extracted_";

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Indices will not be restored at now. Please wait: {initializing} initializing, {unassigned} unassigned shards")]
    Busy { initializing: u64, unassigned: u64 },
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    #[error("invalid snapshot status: {0}")]
    Malformed(String),
    #[error("snapshot {0} not found in status document")]
    SnapshotMissing(String),
}

#[derive(Debug, Default, Deserialize)]
pub struct SnapshotStatus {
    #[serde(default)]
    pub snapshots: Vec<SnapshotStatusEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SnapshotStatusEntry {
    #[serde(default)]
    pub snapshot: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub indices: BTreeMap<String, IndexStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IndexStatus {
    #[serde(default)]
    pub shards_stats: ShardsStats,
    #[serde(default)]
    pub stats: SizeStats,
    #[serde(default)]
    pub shards: BTreeMap<String, ShardStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShardsStats {
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShardStatus {
    #[serde(default)]
    pub stats: SizeStats,
}

#[derive(Debug, Default, Deserialize)]
pub struct SizeStats {
    #[serde(default)]
    pub total: SizeTotal,
}

#[derive(Debug, Default, Deserialize)]
pub struct SizeTotal {
    #[serde(default)]
    pub size_in_bytes: i64,
}

/// Size information for one index inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSnapshotMeta {
    pub name: String,
    pub total_bytes: i64,
    pub shard_bytes: Vec<i64>,
}

/// Pulls the requested indices out of a status document. Names absent from
/// the snapshot get an empty shard list.
pub fn index_metadata(status: &SnapshotStatus, requested: &[String]) -> Result<Vec<IndexSnapshotMeta>, PlanError> {
    let entry = status
        .snapshots
        .first()
        .ok_or_else(|| PlanError::SnapshotMissing(String::from("<empty>")))?;

    Ok(requested
        .iter()
        .map(|name| match entry.indices.get(name) {
            Some(index) => IndexSnapshotMeta {
                name: name.clone(),
                total_bytes: index.stats.total.size_in_bytes,
                shard_bytes: if index.shards_stats.total > 0 {
                    index.shards.values().map(|s| s.stats.total.size_in_bytes).collect()
                } else {
                    Vec::new()
                },
            },
            None => IndexSnapshotMeta {
                name: name.clone(),
                total_bytes: 0,
                shard_bytes: Vec::new(),
            },
        })
        .collect())
}

/// `Σ_node Σ_shard floor(free / shard)`, computed fresh for every index.
pub fn capacity_score(free: &[i64], shard_bytes: &[i64]) -> u64 {
    let mut score: u64 = 0;
    for node_free in free {
        let node_free = (*node_free).max(0) as u64;
        for shard in shard_bytes {
            let shard = (*shard).max(1) as u64;
            score = score.saturating_add(node_free / shard);
        }
    }
    score
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestorePlan {
    pub restore_now: Vec<String>,
    pub deferred: Vec<String>,
}

impl RestorePlan {
    pub fn is_empty(&self) -> bool {
        self.restore_now.is_empty() && self.deferred.is_empty()
    }
}

/// Splits `requested` into indices restorable now and deferred ones.
/// Duplicate names are planned once, in first-seen order.
pub fn plan(
    requested: &[String],
    meta: &[IndexSnapshotMeta],
    capacity: &CapacitySnapshot,
    is_object_store: bool,
) -> RestorePlan {
    let mut seen = HashSet::new();
    let mut result = RestorePlan::default();

    for name in requested {
        if !seen.insert(name.as_str()) {
            continue;
        }
        if is_object_store {
            result.restore_now.push(name.clone());
            continue;
        }
        let fits = meta
            .iter()
            .find(|m| &m.name == name)
            .filter(|m| !m.shard_bytes.is_empty())
            .map(|m| capacity_score(capacity.free(), &m.shard_bytes) > m.shard_bytes.len() as u64)
            .unwrap_or(false);

        if fits {
            result.restore_now.push(name.clone());
        } else {
            result.deferred.push(name.clone());
        }
    }
    result
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterHealth {
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, alias = "initializingShards")]
    pub initializing_shards: u64,
    #[serde(default)]
    pub unassigned_shards: u64,
}

impl ClusterHealth {
    pub fn check_not_busy(&self) -> Result<(), PlanError> {
        if self.initializing_shards > BUSY_SHARD_THRESHOLD || self.unassigned_shards > BUSY_SHARD_THRESHOLD {
            return Err(PlanError::Busy {
                initializing: self.initializing_shards,
                unassigned: self.unassigned_shards,
            });
        }
        Ok(())
    }
}

pub fn rename_replacement(today: NaiveDate) -> String {
    format!("{}$1-{}", RESTORED_PREFIX, today.format("%d-%m-%Y"))
}

pub fn restore_body(indices: &[String], today: NaiveDate) -> Value {
    json!({
        "ignore_unavailable": false,
        "include_global_state": false,
        "include_aliases": false,
        "rename_pattern": "(.+)",
        "rename_replacement": rename_replacement(today),
        "indices": indices,
        "index_settings": { "index.number_of_replicas": 0 },
    })
}

#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub plan: RestorePlan,
    /// Backend answer to the restore call, absent when nothing was sent.
    pub response: Option<Value>,
}

impl RestoreOutcome {
    pub fn summary(&self) -> Value {
        let message = if self.plan.deferred.is_empty() {
            format!("Indices {:?} will be restored", self.plan.restore_now)
        } else if self.plan.restore_now.is_empty() {
            format!("Indices {:?} will not be restored: Not enough space", self.plan.deferred)
        } else {
            format!(
                "Indices {:?} will be restored, indices {:?} will not be restored: Not enough space",
                self.plan.restore_now, self.plan.deferred
            )
        };
        let error = u8::from(!self.plan.deferred.is_empty());
        json!({
            "message": message,
            "error": error,
            "restored": self.plan.restore_now,
            "deferred": self.plan.deferred,
        })
    }
}

pub struct RestorePlanner {
    api: Arc<dyn ClusterApi>,
    capacity: Arc<NodeCapacityModel>,
    is_object_store: bool,
}

impl RestorePlanner {
    pub fn new(api: Arc<dyn ClusterApi>, capacity: Arc<NodeCapacityModel>, is_object_store: bool) -> Self {
        Self {
            api,
            capacity,
            is_object_store,
        }
    }

    pub async fn snapshot_status(&self, repo: &str, snapshot: &str) -> Result<bytes::Bytes, ClientError> {
        let path = format!("_snapshot/{}/{}/_status", segment(repo), segment(snapshot));
        self.api.get(ClusterKind::Snapshot, &path).await
    }

    pub async fn health(&self) -> Result<ClusterHealth, PlanError> {
        let body = self.api.get(ClusterKind::Snapshot, HEALTH_PATH).await?;
        serde_json::from_slice(&body).map_err(|e| PlanError::Malformed(format!("cluster health: {e}")))
    }

    pub async fn restore(&self, repo: &str, snapshot: &str, indices: &[String]) -> Result<RestoreOutcome, PlanError> {
        self.restore_on(repo, snapshot, indices, chrono::Local::now().date_naive())
            .await
    }

    /// Plans and submits a restore, naming restored copies after `today`.
    pub async fn restore_on(
        &self,
        repo: &str,
        snapshot: &str,
        indices: &[String],
        today: NaiveDate,
    ) -> Result<RestoreOutcome, PlanError> {
        let body = self.snapshot_status(repo, snapshot).await?;
        let status: SnapshotStatus =
            serde_json::from_slice(&body).map_err(|e| PlanError::Malformed(e.to_string()))?;
        if status.snapshots.is_empty() {
            return Err(PlanError::SnapshotMissing(snapshot.to_string()));
        }

        self.health().await?.check_not_busy()?;

        let meta = index_metadata(&status, indices)?;
        let capacity = if self.is_object_store {
            CapacitySnapshot::from_free(Vec::new())
        } else {
            self.capacity.refresh().await?.snapshot
        };

        let plan = plan(indices, &meta, &capacity, self.is_object_store);
        tracing::info!(
            repo,
            snapshot,
            now = ?plan.restore_now,
            deferred = ?plan.deferred,
            "restore planned"
        );

        if plan.restore_now.is_empty() {
            return Ok(RestoreOutcome { plan, response: None });
        }

        let path = format!(
            "_snapshot/{}/{}/_restore?wait_for_completion=false",
            segment(repo),
            segment(snapshot)
        );
        let reply = self
            .api
            .post(ClusterKind::Snapshot, &path, &restore_body(&plan.restore_now, today))
            .await?;
        // the restore was accepted, so an unreadable acknowledgement is only logged
        let response = serde_json::from_slice(&reply).unwrap_or_else(|e| {
            tracing::warn!(repo, snapshot, "undecodable restore response: {}", e);
            Value::Null
        });
        Ok(RestoreOutcome {
            plan,
            response: Some(response),
        })
    }
}
