//! The HTTP surface end to end: router, decoding, backend calls and file serving

use crate::harness::{MockCluster, MockReply, TestEnv};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use extractor_mgmt::api::AdminApi;
use extractor_mgmt::client::ClusterApi;
use extractor_mgmt::config::ExtractorConfig;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn app(config: ExtractorConfig, mock: Arc<MockCluster>) -> Router {
    let api: Arc<dyn ClusterApi> = mock;
    Arc::new(AdminApi::new(Arc::new(config), api, CancellationToken::new())).router()
}

async fn post(router: &Router, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/api")
        .header("content-type", "application/json")
        .header("x-real-ip", "192.0.2.7")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn fetch(router: &Router, uri: &str) -> (StatusCode, String) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

#[tokio::test]
async fn test_restore_returns_plan_summary() {
    let env = TestEnv::new();
    let shard = json!({"stats": {"total": {"size_in_bytes": 100}}});
    let mock = Arc::new(
        MockCluster::new()
            .json(
                "GET",
                "_snapshot/repo/nightly/_status",
                json!({"snapshots": [{"snapshot": "nightly", "indices": {
                    "web-1": {"shards_stats": {"total": 1}, "shards": {"0": shard}}
                }}]}),
            )
            .json("GET", "_cluster/health", json!({"initializing_shards": 0, "unassigned_shards": 0}))
            .json("GET", "_cat/nodes", json!([{"ip": "10.0.0.1", "name": "es-1", "d": "100000"}]))
            .json("POST", "_snapshot/repo/nightly/_restore", json!({"accepted": true})),
    );
    let router = app(env.config(), mock.clone());

    let (status, body) = post(
        &router,
        json!({"action": "restore", "values": {"repo": "repo", "snapshot": "nightly", "indices": ["web-1", "web-2"]}}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["restored"], json!(["web-1"]));
    assert_eq!(body["deferred"], json!(["web-2"]));
    assert_eq!(body["error"], 1);
    assert_eq!(mock.count("POST", "_snapshot/repo/nightly/_restore"), 1);
}

#[tokio::test]
async fn test_snapshot_listing_then_resort() {
    let env = TestEnv::new();
    let mock = Arc::new(MockCluster::new().json(
        "GET",
        "_cat/snapshots/nightly",
        json!([
            {"id": "s-2", "status": "SUCCESS", "start_epoch": "20", "end_epoch": "40"},
            {"id": "s-1", "status": "SUCCESS", "start_epoch": "10", "end_epoch": "50"},
            {"id": ".hidden", "status": "SUCCESS", "start_epoch": "5", "end_epoch": "6"}
        ]),
    ));
    let router = app(env.config(), mock.clone());

    let (status, listed) = post(
        &router,
        json!({"action": "get_snapshots", "values": {"repo": "nightly", "otype": "name", "odir": "asc"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed[0]["id"], "s-1");
    assert_eq!(listed.as_array().map(Vec::len), Some(2));

    let (status, sorted) = post(
        &router,
        json!({"action": "get_snapshots_sorted", "values": {"otype": "start", "odir": "desc"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sorted[0]["id"], "s-2");
    assert_eq!(mock.count("GET", "_cat/snapshots"), 1);
}

#[tokio::test]
async fn test_prepare_csv_writes_downloadable_file() {
    let env = TestEnv::new();
    let mock = Arc::new(
        MockCluster::new()
            .json(
                "POST",
                "logs-*/_search",
                json!({"_scroll_id": "c1", "hits": {"hits": [
                    {"_source": {"host": "web-1", "code": 200}},
                    {"_source": {"host": "web-2"}}
                ]}}),
            )
            .json("POST", "_search/scroll", json!({"_scroll_id": "c1", "hits": {"hits": []}}))
            .json("DELETE", "_search/scroll/", json!({"succeeded": true})),
    );
    let router = app(env.config(), mock.clone());

    let (status, summary) = post(
        &router,
        json!({"action": "prepare_csv", "search": {
            "index": "logs-*",
            "fname": "audit",
            "mapping": ["host", "code"]
        }}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["file"], "audit.csv");
    assert_eq!(summary["rows"], 2);
    assert_eq!(summary["truncated"], false);
    assert_eq!(mock.count("DELETE", "_search/scroll/c1"), 1);

    let (status, text) = fetch(&router, "/data/audit.csv").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "host;code\n\"web-1\";200\n\"web-2\";--\n");
    assert_eq!(summary["bytes"], text.len());
}

#[tokio::test]
async fn test_search_rejects_unknown_cluster() {
    let env = TestEnv::new();
    let mock = Arc::new(MockCluster::new());
    let router = app(env.config(), mock.clone());

    let (status, body) = post(
        &router,
        json!({"action": "search", "search": {"index": "logs-*", "cluster": "nowhere"}}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("nowhere"));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn test_unreachable_backend_is_500() {
    let env = TestEnv::new();
    let mock = Arc::new(MockCluster::new().on("GET", "_cat/repositories", MockReply::Unreachable));
    let router = app(env.config(), mock);

    let (status, body) = post(&router, json!({"action": "get_repositories"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_missing_export_file_is_404() {
    let env = TestEnv::new();
    let router = app(env.config(), Arc::new(MockCluster::new()));
    let (status, _) = fetch(&router, "/data/absent.csv").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
