//! Cursor-driven bulk export into the scratch directory.

use crate::client::{segment, ClientError, ClusterApi, ClusterKind};
use crate::format::{ExportFormat, FormatError, RowEncoder};
use crate::query::SearchQuery;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("invalid search page: {0}")]
    Malformed(String),
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("export cancelled")]
    Cancelled,
    #[error("invalid file name {0:?}")]
    InvalidFileName(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Initial,
    Scrolling,
    Draining,
    Done,
    Failed,
}

impl fmt::Display for ExportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportState::Initial => "initial",
            ExportState::Scrolling => "scrolling",
            ExportState::Draining => "draining",
            ExportState::Done => "done",
            ExportState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportLimits {
    pub page_size: u64,
    pub max_rows: u64,
    pub max_bytes: u64,
    pub scroll_keepalive: String,
}

#[derive(Debug, Clone)]
pub struct ExportJob {
    pub index: String,
    pub cluster: ClusterKind,
    /// Bare file name, the extension comes from `format`.
    pub file_name: String,
    pub format: ExportFormat,
    pub query: SearchQuery,
    pub limits: ExportLimits,
}

impl ExportJob {
    pub fn output_name(&self) -> String {
        format!("{}.{}", self.file_name, self.format.extension())
    }

    fn columns(&self) -> Vec<String> {
        self.query
            .time_field
            .iter()
            .chain(self.query.projection().iter())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    #[serde(skip)]
    pub path: PathBuf,
    pub file: String,
    pub rows: u64,
    pub bytes: u64,
    #[serde(skip)]
    pub pages: u64,
    pub truncated: bool,
}

/// Rejects anything that could escape the scratch directory.
pub fn validate_file_name(name: &str) -> Result<(), ExportError> {
    let bad = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(ExportError::InvalidFileName(name.to_string()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ScrollPage {
    #[serde(rename = "_scroll_id", default)]
    scroll_id: Option<String>,
    hits: PageHits,
}

#[derive(Debug, Deserialize)]
struct PageHits {
    #[serde(default)]
    hits: Vec<PageHit>,
}

#[derive(Debug, Deserialize)]
struct PageHit {
    #[serde(rename = "_source", default)]
    source: Map<String, Value>,
    #[serde(default)]
    fields: Map<String, Value>,
}

struct Progress {
    rows: u64,
    bytes: u64,
    pages: u64,
    truncated: bool,
    state: ExportState,
}

impl Progress {
    fn enter(&mut self, job_id: &Uuid, next: ExportState) {
        tracing::debug!(%job_id, from = %self.state, to = %next, "export state");
        self.state = next;
    }
}

pub struct ExportPipeline {
    api: Arc<dyn ClusterApi>,
    scratch_dir: PathBuf,
}

impl ExportPipeline {
    pub fn new(api: Arc<dyn ClusterApi>, scratch_dir: PathBuf) -> Self {
        Self { api, scratch_dir }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Walks the cursor until it is exhausted or a ceiling is reached.
    /// On failure the partially written file is left in place.
    pub async fn run(&self, job: &ExportJob, cancel: &CancellationToken) -> Result<ExportSummary, ExportError> {
        validate_file_name(&job.file_name)?;
        let job_id = Uuid::new_v4();
        let path = self.scratch_dir.join(job.output_name());
        let io_err = |source| ExportError::Io {
            path: path.clone(),
            source,
        };

        tracing::info!(%job_id, index = %job.index, cluster = %job.cluster, file = %path.display(), "export started");
        let file = tokio::fs::File::create(&path).await.map_err(io_err)?;
        let mut out = BufWriter::new(file);
        let mut progress = Progress {
            rows: 0,
            bytes: 0,
            pages: 0,
            truncated: false,
            state: ExportState::Initial,
        };

        let mut cursor: Option<String> = None;
        let walked = self.walk(job, &job_id, &mut out, &mut progress, &mut cursor, cancel).await;
        // released on every exit, failed and cancelled walks included
        self.release(job, &job_id, cursor.as_deref()).await;
        let flushed = out.flush().await.map_err(io_err);

        match walked.and(flushed) {
            Ok(()) => {
                progress.enter(&job_id, ExportState::Done);
                tracing::info!(
                    %job_id,
                    rows = progress.rows,
                    bytes = progress.bytes,
                    pages = progress.pages,
                    truncated = progress.truncated,
                    "export finished"
                );
                Ok(ExportSummary {
                    path: path.clone(),
                    file: job.output_name(),
                    rows: progress.rows,
                    bytes: progress.bytes,
                    pages: progress.pages,
                    truncated: progress.truncated,
                })
            }
            Err(e) => {
                progress.enter(&job_id, ExportState::Failed);
                tracing::error!(%job_id, rows = progress.rows, "export failed: {}", e);
                Err(e)
            }
        }
    }

    async fn walk<W: tokio::io::AsyncWrite + Unpin>(
        &self,
        job: &ExportJob,
        job_id: &Uuid,
        out: &mut W,
        progress: &mut Progress,
        cursor: &mut Option<String>,
        cancel: &CancellationToken,
    ) -> Result<(), ExportError> {
        let path = self.scratch_dir.join(job.output_name());
        let io_err = |source| ExportError::Io {
            path: path.clone(),
            source,
        };
        let limits = &job.limits;
        let encoder = RowEncoder::new(job.format, job.columns());

        if let Some(header) = encoder.header()? {
            if header.len() as u64 > limits.max_bytes {
                progress.truncated = true;
                return Ok(());
            }
            out.write_all(&header).await.map_err(io_err)?;
            progress.bytes += header.len() as u64;
        }

        let first_path = format!("{}/_search?scroll={}", job.index, limits.scroll_keepalive);
        let first_body = job.query.search_body(limits.page_size);
        progress.enter(job_id, ExportState::Scrolling);

        loop {
            if cancel.is_cancelled() {
                return Err(ExportError::Cancelled);
            }
            let reply = match cursor.as_deref() {
                None => self.api.post(job.cluster, &first_path, &first_body).await?,
                Some(id) => {
                    let body = json!({ "scroll": limits.scroll_keepalive, "scroll_id": id });
                    self.api.post(job.cluster, "_search/scroll", &body).await?
                }
            };
            let page: ScrollPage =
                serde_json::from_slice(&reply).map_err(|e| ExportError::Malformed(e.to_string()))?;
            progress.pages += 1;
            if let Some(id) = page.scroll_id.filter(|id| !id.is_empty()) {
                *cursor = Some(id);
            }

            if page.hits.hits.is_empty() {
                return Ok(());
            }

            progress.enter(job_id, ExportState::Draining);
            for hit in &page.hits.hits {
                let doc = if job.query.uses_source() { &hit.source } else { &hit.fields };
                let line = encoder.encode(doc)?;
                if progress.rows + 1 > limits.max_rows || progress.bytes + line.len() as u64 > limits.max_bytes {
                    progress.truncated = true;
                    break;
                }
                out.write_all(&line).await.map_err(io_err)?;
                progress.rows += 1;
                progress.bytes += line.len() as u64;
            }

            if progress.truncated {
                tracing::info!(%job_id, rows = progress.rows, bytes = progress.bytes, "export ceiling reached");
                return Ok(());
            }
            // further pages need a cursor, the original query is never re-issued
            if cursor.is_none() {
                return Err(ExportError::Malformed(String::from("page without _scroll_id")));
            }
            progress.enter(job_id, ExportState::Scrolling);
        }
    }

    async fn release(&self, job: &ExportJob, job_id: &Uuid, cursor: Option<&str>) {
        let Some(id) = cursor else {
            return;
        };
        let path = format!("_search/scroll/{}", segment(id));
        if let Err(e) = self.api.delete(job.cluster, &path).await {
            tracing::warn!(%job_id, "failed to release scroll cursor: {}", e);
        }
    }
}
