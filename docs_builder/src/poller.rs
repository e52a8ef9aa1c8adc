//! Poll loop and bounded job dispatch.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::client::{BuildReport, Job, WorkQueue};
use crate::reporter::{Delivery, Reporter};

/// Runs one claimed job to a terminal report. Never fails: every error is
/// part of the report.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, job: Job) -> BuildReport;
}

pub struct Poller<Q, R> {
    queue: Arc<Q>,
    runner: Arc<R>,
    reporter: Arc<Reporter<Q>>,
    interval: Duration,
    slots: Arc<Semaphore>,
}

impl<Q: WorkQueue, R: JobRunner> Poller<Q, R> {
    pub fn new(
        queue: Arc<Q>,
        runner: Arc<R>,
        spool_dir: PathBuf,
        interval: Duration,
        max_concurrent: usize,
    ) -> Self {
        let reporter = Arc::new(Reporter::new(queue.clone(), spool_dir));
        Self {
            queue,
            runner,
            reporter,
            interval,
            slots: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Poll until `shutdown` resolves, then wait for in-flight jobs to
    /// finish and report.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight = JoinSet::new();
        tokio::pin!(shutdown);
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            spool = %self.reporter.spool_dir().display(),
            "Polling for jobs"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.tick(&mut in_flight).await,
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Job task failed");
                    }
                }
            }
        }

        tracing::info!(in_flight = in_flight.len(), "Poller stopped, draining jobs");
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Job task failed");
            }
        }
    }

    async fn tick(&self, in_flight: &mut JoinSet<()>) {
        let settled = self.reporter.flush_spool().await;
        if settled > 0 {
            tracing::info!(settled, "Flushed spooled reports");
        }

        // A full pool leaves the work on the server for another builder.
        let Ok(slot) = self.slots.clone().try_acquire_owned() else {
            tracing::debug!("All build slots busy, not claiming");
            return;
        };

        let job = match self.queue.claim().await {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Poll failed");
                return;
            }
        };

        tracing::info!(
            job_id = %job.id,
            project = %job.project_slug,
            version = %job.version,
            "Picked up job"
        );

        let runner = self.runner.clone();
        let reporter = self.reporter.clone();
        in_flight.spawn(async move {
            let _slot = slot;
            let job_id = job.id.clone();
            let report = runner.run(job).await;
            match reporter.deliver(&job_id, &report).await {
                Delivery::Delivered => tracing::debug!(job_id = %job_id, "Report delivered"),
                Delivery::Rejected(status) => {
                    tracing::warn!(job_id = %job_id, %status, "Report not accepted")
                }
                Delivery::Spooled => tracing::info!(job_id = %job_id, "Report queued for retry"),
                Delivery::Lost => tracing::error!(job_id = %job_id, "Report lost"),
            }
        });
    }
}
