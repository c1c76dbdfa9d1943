//! Snapshot listing with ordering and a single-repository cache.

use crate::client::{segment, ClientError, ClusterApi, ClusterKind};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

pub const SYSTEM_SNAPSHOT_PATTERN: &str = r"^\.\S+";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("invalid snapshot listing: {0}")]
    Malformed(String),
    #[error("no snapshot listing cached yet, list a repository first")]
    NotCached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCatalogEntry {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "epoch")]
    pub start_epoch: u64,
    #[serde(default, deserialize_with = "epoch")]
    pub end_epoch: u64,
}

// _cat columns come back as strings; in-progress snapshots have no end time.
fn epoch<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
        Null(()),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Num(n) => n,
        Raw::Text(s) => s.trim().parse().unwrap_or(0),
        Raw::Null(()) => 0,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    EndTime,
    StartTime,
    Name,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

/// How a listing is ordered. A missing or unknown key leaves backend order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotOrder {
    pub key: Option<SortKey>,
    pub dir: SortDir,
}

impl SnapshotOrder {
    pub fn parse(otype: &str, odir: &str) -> Self {
        let key = match otype {
            "time" => Some(SortKey::EndTime),
            "start" => Some(SortKey::StartTime),
            "name" => Some(SortKey::Name),
            _ => None,
        };
        let dir = if odir == "asc" { SortDir::Asc } else { SortDir::Desc };
        Self { key, dir }
    }

    pub fn apply(&self, entries: &mut [SnapshotCatalogEntry]) {
        let Some(key) = self.key else {
            return;
        };
        let compare = |a: &SnapshotCatalogEntry, b: &SnapshotCatalogEntry| -> Ordering {
            match key {
                SortKey::EndTime => a.end_epoch.cmp(&b.end_epoch),
                SortKey::StartTime => a.start_epoch.cmp(&b.start_epoch),
                SortKey::Name => a.id.cmp(&b.id),
            }
        };
        match self.dir {
            SortDir::Asc => entries.sort_unstable_by(compare),
            SortDir::Desc => entries.sort_unstable_by(|a, b| compare(b, a)),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedListing {
    repo: String,
    entries: Vec<SnapshotCatalogEntry>,
}

pub struct SnapshotCatalog {
    api: Arc<dyn ClusterApi>,
    include_system: bool,
    system_pattern: Regex,
    cache: RwLock<Option<CachedListing>>,
}

impl SnapshotCatalog {
    pub fn new(api: Arc<dyn ClusterApi>, include_system: bool) -> Self {
        Self {
            api,
            include_system,
            system_pattern: Regex::new(SYSTEM_SNAPSHOT_PATTERN).expect("static pattern"),
            cache: RwLock::new(None),
        }
    }

    pub fn is_system(&self, id: &str) -> bool {
        self.system_pattern.is_match(id)
    }

    /// Fetches the repository's snapshots, filters, orders and caches them.
    pub async fn list(
        &self,
        repo: &str,
        order: SnapshotOrder,
    ) -> Result<Vec<SnapshotCatalogEntry>, CatalogError> {
        let path = format!("_cat/snapshots/{}?format=json", segment(repo));
        let body = self.api.get(ClusterKind::Snapshot, &path).await?;
        let mut entries: Vec<SnapshotCatalogEntry> =
            serde_json::from_slice(&body).map_err(|e| CatalogError::Malformed(e.to_string()))?;

        if !self.include_system {
            entries.retain(|entry| !self.is_system(&entry.id));
        }
        order.apply(&mut entries);

        let mut cache = self.cache.write().await;
        *cache = Some(CachedListing {
            repo: repo.to_string(),
            entries: entries.clone(),
        });
        tracing::debug!(repo, count = entries.len(), "cached snapshot listing");
        Ok(entries)
    }

    /// Re-sorts the cached listing without a network call.
    pub async fn resort(&self, order: SnapshotOrder) -> Result<Vec<SnapshotCatalogEntry>, CatalogError> {
        let mut cache = self.cache.write().await;
        let cached = cache.as_mut().ok_or(CatalogError::NotCached)?;
        order.apply(&mut cached.entries);
        Ok(cached.entries.clone())
    }

    pub async fn cached_repo(&self) -> Option<String> {
        self.cache.read().await.as_ref().map(|c| c.repo.clone())
    }
}
