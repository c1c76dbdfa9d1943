//! Restore planner against a scripted Snapshot cluster

use crate::harness::{MockCluster, MockReply};
use chrono::NaiveDate;
use extractor_mgmt::capacity::NodeCapacityModel;
use extractor_mgmt::client::{ClusterApi, ClusterKind};
use extractor_mgmt::planner::{PlanError, RestorePlanner};
use serde_json::{json, Value};
use std::sync::Arc;

fn status_doc() -> Value {
    let shard = |bytes: i64| json!({"stats": {"total": {"size_in_bytes": bytes}}});
    json!({"snapshots": [{
        "snapshot": "nightly",
        "state": "SUCCESS",
        "indices": {
            "small-1": {"shards_stats": {"total": 2}, "stats": {"total": {"size_in_bytes": 200}},
                        "shards": {"0": shard(100), "1": shard(100)}},
            "small-2": {"shards_stats": {"total": 2}, "stats": {"total": {"size_in_bytes": 200}},
                        "shards": {"0": shard(100), "1": shard(100)}},
            "huge": {"shards_stats": {"total": 1}, "stats": {"total": {"size_in_bytes": 1_000_000}},
                     "shards": {"0": shard(1_000_000)}}
        }
    }]})
}

fn nodes_doc() -> Value {
    json!([
        {"ip": "10.0.0.1", "name": "es-1", "dt": "10000", "du": "9000", "dup": "90.0", "d": "1000"},
        {"ip": "10.0.0.2", "name": "es-2", "dt": "10000", "du": "9500", "dup": "95.0", "d": "500"}
    ])
}

fn healthy() -> Value {
    json!({"cluster_name": "snap", "status": "green", "initializing_shards": 0, "unassigned_shards": 0})
}

fn planner(mock: Arc<MockCluster>, is_object_store: bool) -> RestorePlanner {
    let api: Arc<dyn ClusterApi> = mock;
    let capacity = Arc::new(NodeCapacityModel::new(api.clone()));
    RestorePlanner::new(api, capacity, is_object_store)
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

#[tokio::test]
async fn test_restore_sends_only_fitting_indices() {
    let mock = Arc::new(
        MockCluster::new()
            .json("GET", "_snapshot/repo/nightly/_status", status_doc())
            .json("GET", "_cluster/health", healthy())
            .json("GET", "_cat/nodes", nodes_doc())
            .json("POST", "_snapshot/repo/nightly/_restore", json!({"accepted": true})),
    );

    let outcome = planner(mock.clone(), false)
        .restore_on("repo", "nightly", &names(&["small-1", "huge", "small-2"]), today())
        .await
        .unwrap();

    assert_eq!(outcome.plan.restore_now, names(&["small-1", "small-2"]));
    assert_eq!(outcome.plan.deferred, names(&["huge"]));
    assert_eq!(outcome.response, Some(json!({"accepted": true})));

    let restore = mock
        .calls()
        .into_iter()
        .find(|c| c.method == "POST")
        .unwrap();
    assert_eq!(restore.cluster, ClusterKind::Snapshot);
    assert_eq!(restore.path, "_snapshot/repo/nightly/_restore?wait_for_completion=false");
    let body = restore.body.unwrap();
    assert_eq!(body["indices"], json!(["small-1", "small-2"]));
    assert_eq!(body["rename_replacement"], "extracted_$1-01-05-2024");
    assert_eq!(body["index_settings"]["index.number_of_replicas"], 0);
}

#[tokio::test]
async fn test_restore_skipped_when_nothing_fits() {
    let mock = Arc::new(
        MockCluster::new()
            .json("GET", "_snapshot/", status_doc())
            .json("GET", "_cluster/health", healthy())
            .json("GET", "_cat/nodes", nodes_doc()),
    );

    let outcome = planner(mock.clone(), false)
        .restore_on("repo", "nightly", &names(&["huge"]), today())
        .await
        .unwrap();

    assert!(outcome.plan.restore_now.is_empty());
    assert!(outcome.response.is_none());
    assert_eq!(mock.count("POST", ""), 0);
    assert_eq!(outcome.summary()["error"], 1);
}

#[tokio::test]
async fn test_object_store_skips_capacity_lookup() {
    let mock = Arc::new(
        MockCluster::new()
            .json("GET", "_snapshot/", status_doc())
            .json("GET", "_cluster/health", healthy())
            .json("POST", "_snapshot/", json!({"accepted": true})),
    );

    let outcome = planner(mock.clone(), true)
        .restore_on("repo", "nightly", &names(&["huge", "small-1"]), today())
        .await
        .unwrap();

    assert_eq!(outcome.plan.restore_now, names(&["huge", "small-1"]));
    assert_eq!(mock.count("GET", "_cat/nodes"), 0);
}

#[tokio::test]
async fn test_busy_cluster_refuses_before_capacity_and_restore() {
    let mock = Arc::new(
        MockCluster::new()
            .json("GET", "_snapshot/", status_doc())
            .json("GET", "_cluster/health", json!({"unassigned_shards": 12}))
            .json("GET", "_cat/nodes", nodes_doc()),
    );

    let err = planner(mock.clone(), false)
        .restore_on("repo", "nightly", &names(&["small-1"]), today())
        .await
        .unwrap_err();

    assert!(matches!(err, PlanError::Busy { unassigned: 12, .. }));
    assert_eq!(mock.count("GET", "_cat/nodes"), 0);
    assert_eq!(mock.count("POST", ""), 0);
}

#[tokio::test]
async fn test_capacity_failure_aborts_restore() {
    let mock = Arc::new(
        MockCluster::new()
            .json("GET", "_snapshot/", status_doc())
            .json("GET", "_cluster/health", healthy())
            .on("GET", "_cat/nodes", MockReply::Unreachable),
    );

    let err = planner(mock.clone(), false)
        .restore_on("repo", "nightly", &names(&["small-1"]), today())
        .await
        .unwrap_err();

    assert!(matches!(err, PlanError::Capacity(_)));
    assert_eq!(mock.count("POST", ""), 0);
}

#[tokio::test]
async fn test_rejected_restore_surfaces_reason() {
    let mock = Arc::new(
        MockCluster::new()
            .json("GET", "_snapshot/", status_doc())
            .json("GET", "_cluster/health", healthy())
            .json("GET", "_cat/nodes", nodes_doc())
            .on(
                "POST",
                "_snapshot/",
                MockReply::Reject {
                    status: 500,
                    reason: "cannot restore index [extracted_small-1] because an open index with same name already exists".into(),
                },
            ),
    );

    let err = planner(mock, false)
        .restore_on("repo", "nightly", &names(&["small-1"]), today())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already exists"));
}

#[tokio::test]
async fn test_empty_status_document_is_missing_snapshot() {
    let mock = Arc::new(MockCluster::new().json("GET", "_snapshot/", json!({"snapshots": []})));
    let err = planner(mock, false)
        .restore_on("repo", "gone", &names(&["a"]), today())
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::SnapshotMissing(ref s) if s == "gone"));
}

#[tokio::test]
async fn test_unreadable_restore_acknowledgement_keeps_plan() {
    let mock = Arc::new(
        MockCluster::new()
            .json("GET", "_snapshot/", status_doc())
            .json("GET", "_cluster/health", healthy())
            .json("GET", "_cat/nodes", nodes_doc())
            .on("POST", "_snapshot/", MockReply::Raw(String::from("<html>accepted</html>"))),
    );

    let outcome = planner(mock.clone(), false)
        .restore_on("repo", "nightly", &names(&["small-1"]), today())
        .await
        .unwrap();

    assert_eq!(outcome.plan.restore_now, names(&["small-1"]));
    assert_eq!(outcome.response, Some(Value::Null));
    assert_eq!(mock.count("POST", ""), 1);
}
