use anyhow::{Context, Result};
use clap::Parser;
use extractor_mgmt::cli::{load_config, Cli, Command};
use extractor_mgmt::{AdminApi, ClusterApi, Clusters, NodeCapacityModel, RetentionSweeper};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::Serve { config } => serve(config.clone()).await,
        _ => cli.run().await,
    }
}

async fn serve(config_path: PathBuf) -> Result<()> {
    tracing::info!("extractor {} starting", env!("CARGO_PKG_VERSION"));
    let config = Arc::new(load_config(&config_path)?);

    tokio::fs::create_dir_all(&config.export.scratch_dir)
        .await
        .with_context(|| format!("creating {}", config.export.scratch_dir.display()))?;

    let clusters: Arc<dyn ClusterApi> = Arc::new(Clusters::from_config(&config)?);

    // reachability probe only, a down cluster does not stop startup
    match NodeCapacityModel::new(clusters.clone()).refresh().await {
        Ok(capacity) => tracing::info!(
            nodes = capacity.snapshot.node_count(),
            free_bytes = capacity.snapshot.sum(),
            "Snapshot cluster reachable"
        ),
        Err(e) => tracing::warn!("Snapshot cluster capacity probe failed: {}", e),
    }

    let shutdown = CancellationToken::new();
    let sweeper = RetentionSweeper::new(
        config.export.scratch_dir.clone(),
        config.retention.max_age(),
        config.retention.sweep_interval(),
    );
    let sweeper_token = shutdown.child_token();
    let sweeper_handle = tokio::spawn(async move { sweeper.run(sweeper_token).await });

    let api = Arc::new(AdminApi::new(config.clone(), clusters, shutdown.clone()));
    let server_handle = tokio::spawn(api.serve());

    tokio::select! {
        result = server_handle => {
            shutdown.cancel();
            match result {
                Ok(Ok(())) => tracing::info!("Admin API stopped"),
                Ok(Err(e)) => {
                    tracing::error!("Admin API error: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!("Admin API task failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping...");
            shutdown.cancel();
        }
    }

    if let Err(e) = sweeper_handle.await {
        tracing::warn!("Retention sweeper task ended abnormally: {}", e);
    }
    Ok(())
}
