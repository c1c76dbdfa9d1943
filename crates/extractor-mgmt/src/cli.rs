use crate::capacity::{format_bytes, NodeCapacityModel};
use crate::client::Clusters;
use crate::config::ExtractorConfig;
use crate::sweeper::RetentionSweeper;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "extractor")]
#[command(version, about = "Snapshot restore and bulk export service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the API server and the retention sweeper
    Serve {
        #[arg(short, long, default_value = "main.yml", env = "EXTRACTOR_CONFIG")]
        config: PathBuf,
    },
    /// Print disk capacity of the Snapshot cluster's nodes
    Nodes {
        #[arg(short, long, default_value = "main.yml", env = "EXTRACTOR_CONFIG")]
        config: PathBuf,
    },
    /// Run one retention pass over the scratch directory
    Sweep {
        #[arg(short, long, default_value = "main.yml", env = "EXTRACTOR_CONFIG")]
        config: PathBuf,
    },
}

/// Loads the config file, falling back to defaults when it does not exist.
pub fn load_config(path: &Path) -> Result<ExtractorConfig> {
    if path.exists() {
        ExtractorConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
    } else {
        tracing::warn!("Config file not found, using defaults: {}", path.display());
        let config = ExtractorConfig::default();
        config.validate()?;
        Ok(config)
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Serve { ref config } => anyhow::bail!(
                "serve is handled by the binary entry point (config {})",
                config.display()
            ),
            Command::Nodes { ref config } => Self::nodes(config).await,
            Command::Sweep { ref config } => Self::sweep(config).await,
        }
    }

    async fn nodes(config_path: &Path) -> Result<()> {
        let config = load_config(config_path)?;
        let clusters = Arc::new(Clusters::from_config(&config)?);
        let capacity = NodeCapacityModel::new(clusters).refresh().await?;

        println!(
            "{:<16} {:<24} {:>12} {:>12} {:>12} {:>7}",
            "IP", "NAME", "TOTAL", "USED", "FREE", "USED%"
        );
        for node in &capacity.nodes {
            println!(
                "{:<16} {:<24} {:>12} {:>12} {:>12} {:>6.1}%",
                node.ip,
                node.name,
                format_bytes(node.disk_total),
                format_bytes(node.disk_used),
                format_bytes(node.disk_free),
                node.disk_used_percent
            );
        }
        println!();
        println!(
            "Nodes: {}  Free total: {}  Largest free: {}",
            capacity.snapshot.node_count(),
            format_bytes(capacity.snapshot.sum()),
            format_bytes(capacity.snapshot.max())
        );
        Ok(())
    }

    async fn sweep(config_path: &Path) -> Result<()> {
        let config = load_config(config_path)?;
        let sweeper = RetentionSweeper::new(
            config.export.scratch_dir.clone(),
            config.retention.max_age(),
            config.retention.sweep_interval(),
        );
        let report = sweeper.sweep().await?;
        println!(
            "Scanned: {}  Deleted: {}  Failed: {}",
            report.scanned, report.deleted, report.failed
        );
        Ok(())
    }
}
