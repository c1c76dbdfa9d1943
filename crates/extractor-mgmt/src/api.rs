//! Admin HTTP API: request decoding, action dispatch and the router.

use crate::capacity::{CapacityError, NodeCapacityModel};
use crate::catalog::{CatalogError, SnapshotCatalog, SnapshotOrder};
use crate::client::{segment, ClientError, ClusterApi, ClusterKind};
use crate::config::ExtractorConfig;
use crate::export::{validate_file_name, ExportError, ExportJob, ExportLimits, ExportPipeline};
use crate::format::ExportFormat;
use crate::indices::{flatten_mapping, group_indices, mapping_path, CAT_INDICES_PATH};
use crate::planner::{PlanError, RestorePlanner};
use crate::query::{FieldFilter, QueryError, SearchQuery, TimeRange, SEARCH_PAGE_SIZE};
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub const SERVER_VERSION: &str = concat!("extractor/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Service Unavailable")]
    UnknownAction(String),
    #[error("{0}")]
    Busy(String),
    #[error("{0}")]
    Backend(String),
}

impl ApiError {
    fn missing(name: &str) -> Self {
        ApiError::BadRequest(format!("Required parameter {name} is missed"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownAction(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Busy(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<ClientError> for ApiError {
    fn from(e: ClientError) -> Self {
        ApiError::Backend(e.to_string())
    }
}

impl From<CapacityError> for ApiError {
    fn from(e: CapacityError) -> Self {
        ApiError::Backend(e.to_string())
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotCached => ApiError::BadRequest(e.to_string()),
            other => ApiError::Backend(other.to_string()),
        }
    }
}

impl From<PlanError> for ApiError {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::Busy { .. } => ApiError::Busy(e.to_string()),
            other => ApiError::Backend(other.to_string()),
        }
    }
}

impl From<ExportError> for ApiError {
    fn from(e: ExportError) -> Self {
        match e {
            ExportError::InvalidFileName(_) => ApiError::BadRequest(e.to_string()),
            other => ApiError::Backend(other.to_string()),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Values {
    pub indices: Vec<String>,
    pub repo: String,
    pub odir: String,
    pub otype: String,
    pub snapshot: String,
    pub index: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    pub index: String,
    pub cluster: String,
    pub xql: String,
    pub fields: Vec<String>,
    pub filters: BTreeMap<String, FieldFilter>,
    pub mapping: Vec<String>,
    pub timefields: Vec<String>,
    pub date_start: String,
    pub date_end: String,
    pub search_after: String,
    pub count: bool,
    pub fname: String,
}

/// The request envelope exactly as the UI sends it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawRequest {
    pub action: String,
    pub values: Values,
    pub search: SearchParams,
}

#[derive(Debug, Clone)]
pub enum ApiRequest {
    GetRepositories,
    GetNodes,
    GetIndices,
    DelIndex { index: String },
    GetSnapshots { repo: String, order: SnapshotOrder },
    GetSnapshotsSorted { order: SnapshotOrder },
    GetSnapshot { repo: String, snapshot: String },
    Restore { repo: String, snapshot: String, indices: Vec<String> },
    GetClusters,
    GetIndexGroups { cluster: ClusterKind },
    GetMapping { cluster: ClusterKind, index: String },
    Search { cluster: ClusterKind, index: String, query: SearchQuery, count: bool },
    Export(Box<ExportJob>),
}

type Decoder = fn(RawRequest, &ExtractorConfig) -> Result<ApiRequest, ApiError>;

const DECODERS: &[(&str, Decoder)] = &[
    ("get_repositories", decode_get_repositories),
    ("get_nodes", decode_get_nodes),
    ("get_indices", decode_get_indices),
    ("del_index", decode_del_index),
    ("get_snapshots", decode_get_snapshots),
    ("get_snapshots_sorted", decode_get_snapshots_sorted),
    ("get_snapshot", decode_get_snapshot),
    ("restore", decode_restore),
    ("get_clusters", decode_get_clusters),
    ("get_index_groups", decode_get_index_groups),
    ("get_mapping", decode_get_mapping),
    ("search", decode_search),
    ("prepare_csv", decode_prepare_csv),
    ("prepare_json", decode_prepare_json),
];

impl ApiRequest {
    pub fn decode(raw: RawRequest, config: &ExtractorConfig) -> Result<Self, ApiError> {
        let decoder = DECODERS
            .iter()
            .find(|(name, _)| *name == raw.action)
            .map(|(_, decoder)| *decoder)
            .ok_or_else(|| ApiError::UnknownAction(raw.action.clone()))?;
        decoder(raw, config)
    }
}

fn required(value: &str, name: &str) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::missing(name));
    }
    Ok(value.to_string())
}

fn index_pattern(value: &str, name: &str) -> Result<String, ApiError> {
    let index = required(value, name)?;
    if index.contains(['/', '?', '#']) {
        return Err(ApiError::BadRequest(format!("{name} {index:?} is not an index pattern")));
    }
    Ok(index)
}

fn cluster(raw: &RawRequest, config: &ExtractorConfig) -> Result<ClusterKind, ApiError> {
    config
        .resolve_cluster(&raw.search.cluster)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown cluster {:?}", raw.search.cluster)))
}

fn decode_get_repositories(_: RawRequest, _: &ExtractorConfig) -> Result<ApiRequest, ApiError> {
    Ok(ApiRequest::GetRepositories)
}

fn decode_get_nodes(_: RawRequest, _: &ExtractorConfig) -> Result<ApiRequest, ApiError> {
    Ok(ApiRequest::GetNodes)
}

fn decode_get_indices(_: RawRequest, _: &ExtractorConfig) -> Result<ApiRequest, ApiError> {
    Ok(ApiRequest::GetIndices)
}

fn decode_del_index(raw: RawRequest, _: &ExtractorConfig) -> Result<ApiRequest, ApiError> {
    let index = required(&raw.values.index, "Values.Index")?;
    // exactly one concrete index
    if index.contains(['*', ',', '/', '?', '#']) || index == "_all" {
        return Err(ApiError::BadRequest(format!("refusing to delete {index:?}")));
    }
    Ok(ApiRequest::DelIndex { index })
}

fn decode_get_snapshots(raw: RawRequest, _: &ExtractorConfig) -> Result<ApiRequest, ApiError> {
    Ok(ApiRequest::GetSnapshots {
        repo: required(&raw.values.repo, "Values.Repo")?,
        order: SnapshotOrder::parse(&raw.values.otype, &raw.values.odir),
    })
}

fn decode_get_snapshots_sorted(raw: RawRequest, _: &ExtractorConfig) -> Result<ApiRequest, ApiError> {
    Ok(ApiRequest::GetSnapshotsSorted {
        order: SnapshotOrder::parse(&raw.values.otype, &raw.values.odir),
    })
}

fn decode_get_snapshot(raw: RawRequest, _: &ExtractorConfig) -> Result<ApiRequest, ApiError> {
    Ok(ApiRequest::GetSnapshot {
        repo: required(&raw.values.repo, "Values.Repo")?,
        snapshot: required(&raw.values.snapshot, "Values.Snapshot")?,
    })
}

fn decode_restore(raw: RawRequest, _: &ExtractorConfig) -> Result<ApiRequest, ApiError> {
    let repo = required(&raw.values.repo, "Values.Repo")?;
    let snapshot = required(&raw.values.snapshot, "Values.Snapshot")?;
    let indices: Vec<String> = raw
        .values
        .indices
        .into_iter()
        .map(|i| i.trim().to_string())
        .filter(|i| !i.is_empty())
        .collect();
    if indices.is_empty() {
        return Err(ApiError::missing("Values.Indices"));
    }
    Ok(ApiRequest::Restore { repo, snapshot, indices })
}

fn decode_get_clusters(_: RawRequest, _: &ExtractorConfig) -> Result<ApiRequest, ApiError> {
    Ok(ApiRequest::GetClusters)
}

fn decode_get_index_groups(raw: RawRequest, config: &ExtractorConfig) -> Result<ApiRequest, ApiError> {
    Ok(ApiRequest::GetIndexGroups {
        cluster: cluster(&raw, config)?,
    })
}

fn decode_get_mapping(raw: RawRequest, config: &ExtractorConfig) -> Result<ApiRequest, ApiError> {
    Ok(ApiRequest::GetMapping {
        cluster: cluster(&raw, config)?,
        index: index_pattern(&raw.search.index, "Search.Index")?,
    })
}

fn search_query(search: SearchParams, config: &ExtractorConfig) -> Result<SearchQuery, ApiError> {
    let offset = FixedOffset::east_opt(config.export.input_utc_offset_secs)
        .ok_or_else(|| ApiError::Backend("invalid export.input_utc_offset_secs".into()))?;
    let time_field = search.timefields.into_iter().find(|f| !f.trim().is_empty());
    let range = match (&time_field, search.date_start.trim(), search.date_end.trim()) {
        (Some(_), start, end) if !start.is_empty() && !end.is_empty() => Some(TimeRange::parse(start, end, offset)?),
        _ => None,
    };
    let text = Some(search.xql).filter(|t| !t.trim().is_empty());

    Ok(SearchQuery {
        fields: search.fields.into_iter().filter(|f| !f.is_empty()).collect(),
        mapping: search.mapping,
        filters: search.filters.into_values().collect(),
        text,
        time_field,
        range,
    })
}

fn decode_search(raw: RawRequest, config: &ExtractorConfig) -> Result<ApiRequest, ApiError> {
    let cluster = cluster(&raw, config)?;
    let index = index_pattern(&raw.search.index, "Search.Index")?;
    let count = raw.search.count;
    let query = search_query(raw.search, config)?;
    Ok(ApiRequest::Search {
        cluster,
        index,
        query,
        count,
    })
}

fn decode_export(raw: RawRequest, config: &ExtractorConfig, format: ExportFormat) -> Result<ApiRequest, ApiError> {
    let cluster = cluster(&raw, config)?;
    let index = index_pattern(&raw.search.index, "Search.Index")?;
    let file_name = required(&raw.search.fname, "Search.Fname")?;
    validate_file_name(&file_name)?;
    let query = search_query(raw.search, config)?;
    Ok(ApiRequest::Export(Box::new(ExportJob {
        index,
        cluster,
        file_name,
        format,
        query,
        limits: ExportLimits {
            page_size: config.export.page_size,
            max_rows: config.export.max_rows,
            max_bytes: config.export.max_bytes,
            scroll_keepalive: config.export.scroll_keepalive.clone(),
        },
    })))
}

fn decode_prepare_csv(raw: RawRequest, config: &ExtractorConfig) -> Result<ApiRequest, ApiError> {
    decode_export(raw, config, ExportFormat::Csv)
}

fn decode_prepare_json(raw: RawRequest, config: &ExtractorConfig) -> Result<ApiRequest, ApiError> {
    decode_export(raw, config, ExportFormat::JsonLines)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterInfo {
    pub name: String,
    pub host: String,
    #[serde(rename = "Type")]
    pub kind: String,
}

pub struct AdminApi {
    config: Arc<ExtractorConfig>,
    api: Arc<dyn ClusterApi>,
    capacity: Arc<NodeCapacityModel>,
    catalog: SnapshotCatalog,
    planner: RestorePlanner,
    exporter: ExportPipeline,
    shutdown: CancellationToken,
}

impl AdminApi {
    pub fn new(config: Arc<ExtractorConfig>, api: Arc<dyn ClusterApi>, shutdown: CancellationToken) -> Self {
        let capacity = Arc::new(NodeCapacityModel::new(api.clone()));
        Self {
            catalog: SnapshotCatalog::new(api.clone(), config.snapshot.include_system),
            planner: RestorePlanner::new(api.clone(), capacity.clone(), config.snapshot.is_s3),
            exporter: ExportPipeline::new(api.clone(), config.export.scratch_dir.clone()),
            capacity,
            config,
            api,
            shutdown,
        }
    }

    pub fn router(self: Arc<Self>) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::POST, Method::OPTIONS])
            .allow_headers(Any);

        Router::new()
            .route("/api", post(api_handler))
            .route("/api/", post(api_handler))
            .nest_service("/data", ServeDir::new(&self.config.export.scratch_dir))
            .layer(axum::middleware::from_fn(server_headers_middleware))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    pub async fn serve(self: Arc<Self>) -> anyhow::Result<()> {
        let addr = self.config.app.bind_addr();
        let shutdown = self.shutdown.clone();
        let router = self.router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Admin API listening on {}", addr);

        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }

    pub async fn handle(&self, request: ApiRequest) -> Result<Response, ApiError> {
        match request {
            ApiRequest::GetRepositories => {
                let body = self.api.get(ClusterKind::Snapshot, "_cat/repositories?format=json").await?;
                Ok(passthrough(body))
            }
            ApiRequest::GetNodes => {
                let capacity = self.capacity.refresh().await?;
                Ok(Json(capacity.nodes).into_response())
            }
            ApiRequest::GetIndices => {
                let body = self.api.get(ClusterKind::Snapshot, "extracted*/_recovery/").await?;
                Ok(passthrough(body))
            }
            ApiRequest::DelIndex { index } => {
                let body = self.api.delete(ClusterKind::Snapshot, &segment(&index)).await?;
                tracing::info!(index = %index, "index deleted");
                Ok(passthrough(body))
            }
            ApiRequest::GetSnapshots { repo, order } => Ok(Json(self.catalog.list(&repo, order).await?).into_response()),
            ApiRequest::GetSnapshotsSorted { order } => Ok(Json(self.catalog.resort(order).await?).into_response()),
            ApiRequest::GetSnapshot { repo, snapshot } => {
                Ok(passthrough(self.planner.snapshot_status(&repo, &snapshot).await?))
            }
            ApiRequest::Restore {
                repo,
                snapshot,
                indices,
            } => {
                let outcome = self.planner.restore(&repo, &snapshot, &indices).await?;
                Ok(Json(outcome.summary()).into_response())
            }
            ApiRequest::GetClusters => Ok(Json(self.clusters()).into_response()),
            ApiRequest::GetIndexGroups { cluster } => {
                let body = self.api.get(cluster, CAT_INDICES_PATH).await?;
                let groups = group_indices(&body).map_err(|e| ApiError::Backend(format!("invalid index listing: {e}")))?;
                Ok(Json(groups).into_response())
            }
            ApiRequest::GetMapping { cluster, index } => {
                let path = mapping_path(&index, chrono::Local::now().date_naive());
                let body = self.api.get(cluster, &path).await?;
                let doc: serde_json::Value =
                    serde_json::from_slice(&body).map_err(|e| ApiError::Backend(format!("invalid mapping: {e}")))?;
                Ok(Json(flatten_mapping(&doc)).into_response())
            }
            ApiRequest::Search {
                cluster,
                index,
                query,
                count,
            } => {
                let body = if count {
                    self.api.post(cluster, &format!("{index}/_count"), &query.count_body()).await?
                } else {
                    let search = query.search_body(SEARCH_PAGE_SIZE);
                    self.api.post(cluster, &format!("{index}/_search"), &search).await?
                };
                Ok(passthrough(body))
            }
            ApiRequest::Export(job) => {
                let summary = self.exporter.run(&job, &self.shutdown.child_token()).await?;
                Ok(Json(summary).into_response())
            }
        }
    }

    fn clusters(&self) -> Vec<ClusterInfo> {
        [ClusterKind::Snapshot, ClusterKind::Search]
            .into_iter()
            .map(|kind| {
                let cluster = self.config.cluster(kind);
                ClusterInfo {
                    name: cluster.display_name(),
                    host: cluster.host.clone(),
                    kind: kind.to_string(),
                }
            })
            .collect()
    }
}

fn passthrough(body: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "application/json; charset=utf-8")], body).into_response()
}

fn remote_addr(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    header_value("x-real-ip")
        .or_else(|| header_value("x-forwarded-for"))
        .or_else(|| peer.map(|p| p.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

async fn api_handler(
    State(state): State<Arc<AdminApi>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let remote = remote_addr(&headers, peer.map(|ConnectInfo(addr)| addr));
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let raw: RawRequest = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(e) => {
            let err = ApiError::BadRequest(format!("invalid request body: {e}"));
            tracing::warn!(%remote, %user_agent, "rejected request: {}", err);
            return err.into_response();
        }
    };
    let action = raw.action.clone();

    let result = match ApiRequest::decode(raw, &state.config) {
        Ok(request) => state.handle(request).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(response) => {
            tracing::info!(%remote, %action, %user_agent, status = response.status().as_u16(), "handled");
            response
        }
        Err(e) => {
            let status = e.status();
            if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
                tracing::error!(%remote, %action, status = status.as_u16(), "action failed: {}", e);
            } else {
                tracing::warn!(%remote, %action, status = status.as_u16(), "action refused: {}", e);
            }
            e.into_response()
        }
    }
}

async fn server_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("x-server"),
        HeaderValue::from_static(SERVER_VERSION),
    );
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    response
}
