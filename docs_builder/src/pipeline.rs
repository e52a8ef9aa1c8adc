//! The build pipeline: fetch, execute, validate, publish.
//!
//! Stages run in order and the first error ends the job. Whatever happens,
//! the job yields exactly one [`BuildReport`] carrying the container log,
//! and its working directories are removed before the report is returned.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use opendal::Operator;
use tempfile::TempDir;

use crate::client::{BuildReport, Job};
use crate::poller::JobRunner;
use crate::sandbox::Sandbox;
use crate::stages::{self, fetch::FETCH_TIMEOUT, Stage, StageError};

/// Per-job scratch space: a checkout directory and an output directory.
pub struct JobWorkspace {
    source: TempDir,
    output: TempDir,
}

impl JobWorkspace {
    pub fn create(base: &Path, job_id: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(base)?;
        let source = tempfile::Builder::new()
            .prefix(&format!("builder-repo-{job_id}-"))
            .tempdir_in(base)?;
        let output = tempfile::Builder::new()
            .prefix(&format!("builder-output-{job_id}-"))
            .tempdir_in(base)?;
        Ok(Self { source, output })
    }

    /// Clone target. Does not exist until fetch creates it.
    pub fn source_dir(&self) -> PathBuf {
        self.source.path().join("src")
    }

    pub fn output_dir(&self) -> &Path {
        self.output.path()
    }

    fn cleanup(self, job_id: &str) {
        for dir in [self.source, self.output] {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!(job_id, path = %path.display(), error = %e, "Failed to remove job directory");
            }
        }
    }
}

pub struct Pipeline {
    sandbox: Sandbox,
    store: Operator,
    workspace_dir: PathBuf,
    fetch_timeout: Duration,
}

impl Pipeline {
    pub fn new(sandbox: Sandbox, store: Operator, workspace_dir: PathBuf) -> Self {
        Self {
            sandbox,
            store,
            workspace_dir,
            fetch_timeout: FETCH_TIMEOUT,
        }
    }

    /// Run `job` through every stage and build its report.
    pub async fn execute(&self, mut job: Job) -> BuildReport {
        let started = Instant::now();
        let mut logs = String::new();

        let outcome = match JobWorkspace::create(&self.workspace_dir, &job.id) {
            Ok(workspace) => {
                let outcome = self.run_stages(&mut job, &workspace, &mut logs).await;
                workspace.cleanup(&job.id);
                outcome
            }
            Err(e) => Err(StageError::Workspace(e)),
        };

        let elapsed = started.elapsed();
        match outcome {
            Ok(()) => {
                tracing::info!(
                    job_id = %job.id,
                    duration_ms = elapsed.as_millis() as u64,
                    "Job completed successfully"
                );
                BuildReport::success(logs, job.source_ref, elapsed)
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Job failed");
                BuildReport::failed(e.to_string(), logs, job.source_ref, elapsed)
            }
        }
    }

    async fn run_stages(
        &self,
        job: &mut Job,
        workspace: &JobWorkspace,
        logs: &mut String,
    ) -> Result<(), StageError> {
        stage_started(Stage::Fetch, job);
        job.source_ref = stages::fetch::run(
            &job.source_url,
            &job.source_ref,
            &workspace.source_dir(),
            self.fetch_timeout,
        )
        .await?;
        stage_done(Stage::Fetch, job);

        stage_started(Stage::Execute, job);
        let run = stages::execute::run(
            &self.sandbox,
            &job.id,
            &job.docker_image,
            &workspace.source_dir(),
            workspace.output_dir(),
        )
        .await;
        *logs = run.logs;
        run.result?;
        stage_done(Stage::Execute, job);

        stage_started(Stage::Validate, job);
        stages::validate::run(workspace.output_dir()).await?;
        stage_done(Stage::Validate, job);

        stage_started(Stage::Publish, job);
        stages::publish::run(
            &self.store,
            &job.project_slug,
            &publish_version(job),
            workspace.output_dir(),
        )
        .await?;
        stage_done(Stage::Publish, job);

        Ok(())
    }
}

/// Untagged builds publish under the ref they were built from, folded into
/// one key segment.
fn publish_version(job: &Job) -> String {
    if job.version.is_empty() {
        stages::path_segment(&job.source_ref)
    } else {
        job.version.clone()
    }
}

fn stage_started(stage: Stage, job: &Job) {
    tracing::info!(job_id = %job.id, stage = %stage, "Stage starting");
}

fn stage_done(stage: Stage, job: &Job) {
    tracing::info!(job_id = %job.id, stage = %stage, "Stage done");
}

#[async_trait]
impl JobRunner for Pipeline {
    async fn run(&self, job: Job) -> BuildReport {
        self.execute(job).await
    }
}
