//! Builder configuration, from flags or the environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};

#[derive(Parser, Clone)]
#[command(name = "doc-thor-builder", about = "doc-thor documentation build worker")]
pub struct BuilderConfig {
    /// Queue server base URL
    #[arg(long, env = "SERVER_URL", default_value = "http://localhost:8080")]
    pub server_url: String,

    /// Shared secret for the builder endpoints
    #[arg(long, env = "BUILDER_TOKEN", hide_env_values = true)]
    pub builder_token: String,

    #[command(flatten)]
    pub storage: StorageConfig,

    /// Seconds between polls
    #[arg(long, env = "POLL_INTERVAL", default_value_t = 5,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval: u64,

    /// Hard cap on a build container's run time, in seconds
    #[arg(long, env = "CONTAINER_TIMEOUT", default_value_t = 300,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub container_timeout: u64,

    /// Parent directory for per-job checkouts, outputs and the report spool
    #[arg(long, env = "WORKSPACE_DIR", default_value_os_t = std::env::temp_dir())]
    pub workspace_dir: PathBuf,

    /// Jobs run at the same time
    #[arg(long, env = "MAX_CONCURRENT_BUILDS", default_value_t = 2,
          value_parser = clap::value_parser!(u16).range(1..))]
    pub max_concurrent_builds: u16,
}

/// S3-compatible artifact store.
#[derive(Args, Clone)]
pub struct StorageConfig {
    #[arg(long = "storage-bucket", env = "STORAGE_BUCKET", default_value = "doc-thor-docs")]
    pub bucket: String,

    /// Custom endpoint, e.g. a MinIO URL
    #[arg(long = "storage-endpoint", env = "STORAGE_ENDPOINT")]
    pub endpoint: Option<String>,

    #[arg(long = "storage-region", env = "STORAGE_REGION", default_value = "us-east-1")]
    pub region: String,

    #[arg(long = "storage-access-key", env = "STORAGE_ACCESS_KEY", hide_env_values = true)]
    pub access_key: Option<String>,

    #[arg(long = "storage-secret-key", env = "STORAGE_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,
}

impl BuilderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn container_timeout(&self) -> Duration {
        Duration::from_secs(self.container_timeout)
    }

    pub fn max_concurrent_builds(&self) -> usize {
        usize::from(self.max_concurrent_builds)
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.workspace_dir.join("spool")
    }
}
