//! Extractor: snapshot restore planning, bulk export and scratch retention for search-engine clusters

pub mod api;
pub mod capacity;
pub mod catalog;
pub mod cli;
pub mod client;
pub mod config;
pub mod export;
pub mod format;
pub mod indices;
pub mod planner;
pub mod query;
pub mod sweeper;

pub use api::{AdminApi, ApiError, ApiRequest, RawRequest};
pub use capacity::{CapacitySnapshot, NodeCapacity, NodeCapacityModel, NodeStat};
pub use catalog::{SnapshotCatalog, SnapshotCatalogEntry, SnapshotOrder};
pub use client::{ClientError, ClusterApi, ClusterClient, ClusterKind, Clusters};
pub use config::ExtractorConfig;
pub use export::{ExportJob, ExportLimits, ExportPipeline, ExportState, ExportSummary};
pub use format::{ExportFormat, RowEncoder};
pub use planner::{RestoreOutcome, RestorePlan, RestorePlanner};
pub use query::{FieldFilter, FilterOp, SearchQuery, TimeRange};
pub use sweeper::{RetentionSweeper, SweepReport};
