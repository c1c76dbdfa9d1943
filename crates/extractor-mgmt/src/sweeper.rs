//! Periodic deletion of old exported files.

use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("cannot list {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
}

pub struct RetentionSweeper {
    dir: PathBuf,
    max_age: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(dir: PathBuf, max_age: Duration, interval: Duration) -> Self {
        Self { dir, max_age, interval }
    }

    pub async fn sweep(&self) -> Result<SweepReport, SweepError> {
        self.sweep_at(SystemTime::now()).await
    }

    /// One pass over the directory, ageing entries against `now`.
    pub async fn sweep_at(&self, now: SystemTime) -> Result<SweepReport, SweepError> {
        let list_err = |source| SweepError::List {
            path: self.dir.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(list_err)?;
        let mut report = SweepReport::default();

        while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
            report.scanned += 1;
            let path = entry.path();
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!("cannot stat {}: {}", path.display(), e);
                    report.failed += 1;
                    continue;
                }
            };
            // files stamped in the future have no age yet
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= self.max_age {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::info!("deleted {} which is {}s old", path.display(), age.as_secs());
                    report.deleted += 1;
                }
                Err(e) => {
                    tracing::warn!("failed to delete {}: {}", path.display(), e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Sweeps every `interval` until cancelled. A failed cycle is logged and
    /// the schedule continues.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            dir = %self.dir.display(),
            max_age_secs = self.max_age.as_secs(),
            interval_secs = self.interval.as_secs(),
            "retention sweeper started"
        );
        loop {
            match self.sweep().await {
                Ok(report) if report.deleted > 0 || report.failed > 0 => {
                    tracing::info!(
                        scanned = report.scanned,
                        deleted = report.deleted,
                        failed = report.failed,
                        "sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!("sweep failed: {}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("retention sweeper stopped");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
