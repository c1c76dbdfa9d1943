//! Snapshot catalog listing, filtering and cached re-sorting

use crate::harness::MockCluster;
use extractor_mgmt::catalog::{CatalogError, SnapshotCatalog, SnapshotCatalogEntry, SnapshotOrder};
use extractor_mgmt::client::ClusterApi;
use serde_json::json;
use std::sync::Arc;

fn listing() -> MockCluster {
    MockCluster::new().json(
        "GET",
        "_cat/snapshots/nightly",
        json!([
            {"id": "b-snap", "status": "SUCCESS", "start_epoch": "1700000100", "end_epoch": "1700000900"},
            {"id": ".system-snap", "status": "SUCCESS", "start_epoch": "1700000000", "end_epoch": "1700000050"},
            {"id": "a-snap", "status": "SUCCESS", "start_epoch": "1700000200", "end_epoch": "1700000300"},
            {"id": "c-snap", "status": "PARTIAL", "start_epoch": "1700000300", "end_epoch": "1700000600"}
        ]),
    )
}

fn catalog(mock: Arc<MockCluster>, include_system: bool) -> SnapshotCatalog {
    let api: Arc<dyn ClusterApi> = mock;
    SnapshotCatalog::new(api, include_system)
}

fn ids(entries: &[SnapshotCatalogEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.id.as_str()).collect()
}

#[tokio::test]
async fn test_list_excludes_system_snapshots() {
    let mock = Arc::new(listing());
    let entries = catalog(mock.clone(), false)
        .list("nightly", SnapshotOrder::parse("name", "asc"))
        .await
        .unwrap();
    assert_eq!(ids(&entries), vec!["a-snap", "b-snap", "c-snap"]);
    assert_eq!(mock.calls()[0].path, "_cat/snapshots/nightly?format=json");
}

#[tokio::test]
async fn test_list_includes_system_snapshots_when_configured() {
    let mock = Arc::new(listing());
    let entries = catalog(mock, true)
        .list("nightly", SnapshotOrder::parse("time", "asc"))
        .await
        .unwrap();
    assert_eq!(ids(&entries), vec![".system-snap", "a-snap", "c-snap", "b-snap"]);
}

#[tokio::test]
async fn test_resort_uses_cache_only() {
    let mock = Arc::new(listing());
    let catalog = catalog(mock.clone(), false);
    catalog.list("nightly", SnapshotOrder::parse("", "")).await.unwrap();
    assert_eq!(mock.count("GET", ""), 1);

    let by_name = catalog.resort(SnapshotOrder::parse("name", "asc")).await.unwrap();
    let by_end = catalog.resort(SnapshotOrder::parse("time", "desc")).await.unwrap();

    assert_eq!(ids(&by_name), vec!["a-snap", "b-snap", "c-snap"]);
    assert_eq!(ids(&by_end), vec!["b-snap", "c-snap", "a-snap"]);
    assert_ne!(ids(&by_name), ids(&by_end));
    assert_eq!(mock.count("GET", ""), 1);
    assert_eq!(catalog.cached_repo().await.as_deref(), Some("nightly"));
}

#[tokio::test]
async fn test_resort_without_listing_fails() {
    let catalog = catalog(Arc::new(MockCluster::new()), false);
    let err = catalog.resort(SnapshotOrder::parse("name", "asc")).await.unwrap_err();
    assert!(matches!(err, CatalogError::NotCached));
}

#[tokio::test]
async fn test_failed_list_keeps_previous_cache() {
    let mock = Arc::new(listing());
    let catalog = catalog(mock, false);
    catalog.list("nightly", SnapshotOrder::parse("name", "asc")).await.unwrap();

    let err = catalog.list("weekly", SnapshotOrder::parse("name", "asc")).await.unwrap_err();
    assert!(matches!(err, CatalogError::Client(_)));
    assert_eq!(catalog.cached_repo().await.as_deref(), Some("nightly"));
}
