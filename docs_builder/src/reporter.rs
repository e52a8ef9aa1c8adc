//! Report delivery with a local spool for reports the server could not take.
//!
//! A report that fails in transport or with a server error is written to
//! `<spool>/<job-id>.json` and retried by [`Reporter::flush_spool`] until
//! the server either accepts or rejects it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::client::{BuildReport, ClientError, WorkQueue};

/// What happened to a report.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The server refused it (unknown build, already final, malformed).
    Rejected(StatusCode),
    /// Not delivered yet; kept on disk for the next flush.
    Spooled,
    /// Not delivered and could not be spooled either.
    Lost,
}

#[derive(Serialize, Deserialize)]
struct SpooledReport {
    job_id: String,
    report: BuildReport,
}

pub struct Reporter<Q> {
    queue: Arc<Q>,
    spool_dir: PathBuf,
}

/// Spool file name for a job. Ids come from the server; anything outside
/// a conservative charset is replaced so the name stays inside the spool.
fn spool_file_name(job_id: &str) -> String {
    let safe: String = job_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{safe}.json")
}

impl<Q: WorkQueue> Reporter<Q> {
    pub fn new(queue: Arc<Q>, spool_dir: PathBuf) -> Self {
        Self { queue, spool_dir }
    }

    pub fn spool_dir(&self) -> &Path {
        &self.spool_dir
    }

    /// Send `report` for `job_id`, spooling it when the server is unreachable.
    pub async fn deliver(&self, job_id: &str, report: &BuildReport) -> Delivery {
        match self.queue.report(job_id, report).await {
            Ok(()) => Delivery::Delivered,
            Err(ClientError::Rejected(status)) => {
                tracing::warn!(job_id, %status, "Server rejected build report");
                Delivery::Rejected(status)
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Report delivery failed, spooling");
                match self.spool(job_id, report).await {
                    Ok(path) => {
                        tracing::info!(job_id, path = %path.display(), "Report spooled");
                        Delivery::Spooled
                    }
                    Err(io) => {
                        tracing::error!(job_id, error = %io, "Failed to spool report");
                        Delivery::Lost
                    }
                }
            }
        }
    }

    async fn spool(&self, job_id: &str, report: &BuildReport) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.spool_dir).await?;
        let entry = SpooledReport {
            job_id: job_id.to_string(),
            report: report.clone(),
        };
        let body = serde_json::to_vec(&entry)?;

        let path = self.spool_dir.join(spool_file_name(job_id));
        let partial = path.with_extension("json.partial");
        tokio::fs::write(&partial, body).await?;
        tokio::fs::rename(&partial, &path).await?;
        Ok(path)
    }

    /// Retry every spooled report. Stops at the first transport failure,
    /// since the rest would fail the same way. Returns how many reports left
    /// the spool (delivered or rejected).
    pub async fn flush_spool(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.spool_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot read report spool");
                return 0;
            }
        };

        let mut paths = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    if path.extension().is_some_and(|ext| ext == "json") {
                        paths.push(path);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Spool listing ended early");
                    break;
                }
            }
        }
        paths.sort();

        let mut settled = 0;
        for path in paths {
            let spooled = match tokio::fs::read(&path).await {
                Ok(raw) => serde_json::from_slice::<SpooledReport>(&raw),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Cannot read spooled report");
                    continue;
                }
            };
            let spooled = match spooled {
                Ok(spooled) => spooled,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Discarding corrupt spooled report");
                    remove_spooled(&path).await;
                    continue;
                }
            };

            match self.queue.report(&spooled.job_id, &spooled.report).await {
                Ok(()) => {
                    tracing::info!(job_id = %spooled.job_id, "Spooled report delivered");
                }
                Err(ClientError::Rejected(status)) => {
                    tracing::warn!(job_id = %spooled.job_id, %status, "Spooled report rejected, dropping");
                }
                Err(e) => {
                    tracing::debug!(job_id = %spooled.job_id, error = %e, "Server still unreachable");
                    break;
                }
            }
            remove_spooled(&path).await;
            settled += 1;
        }
        settled
    }
}

async fn remove_spooled(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove spooled report");
    }
}
