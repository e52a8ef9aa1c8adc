//! doc-thor build worker.
//!
//! Polls the queue server for pending builds and runs each one through
//! fetch, a sandboxed build container, validation and publication to the
//! artifact store, then reports the outcome back.

mod client;
mod config;
mod pipeline;
mod poller;
mod reporter;
mod sandbox;
mod stages;
mod storage;

use std::sync::Arc;

use clap::Parser;

use crate::client::QueueClient;
use crate::config::BuilderConfig;
use crate::pipeline::Pipeline;
use crate::poller::Poller;
use crate::sandbox::docker::DockerRuntime;
use crate::sandbox::Sandbox;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let config = BuilderConfig::parse();
    if config.builder_token.is_empty() {
        eyre::bail!("BUILDER_TOKEN must not be empty");
    }
    tokio::fs::create_dir_all(&config.workspace_dir).await?;

    let store = storage::s3_operator(&config.storage)?;
    let runtime = DockerRuntime::connect()?;
    let sandbox = Sandbox::new(Arc::new(runtime), config.container_timeout());
    let container_timeout = sandbox.timeout();
    let pipeline = Pipeline::new(sandbox, store, config.workspace_dir.clone());
    let queue = QueueClient::new(&config.server_url, &config.builder_token)?;

    tracing::info!(
        server = %config.server_url,
        poll_interval_secs = config.poll_interval,
        container_timeout_secs = container_timeout.as_secs(),
        max_concurrent_builds = config.max_concurrent_builds,
        workspace = %config.workspace_dir.display(),
        "doc-thor builder started"
    );

    Poller::new(
        Arc::new(queue),
        Arc::new(pipeline),
        config.spool_dir(),
        config.poll_interval(),
        config.max_concurrent_builds(),
    )
    .run(shutdown_signal())
    .await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, draining in-flight builds..."),
        _ = terminate => tracing::info!("Received SIGTERM, draining in-flight builds..."),
    }
}
