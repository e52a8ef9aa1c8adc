//! Execute: run the project's build image over the fetched sources.

use std::path::Path;

use crate::sandbox::{Sandbox, SandboxRun, SandboxSpec};
use crate::stages::path_segment;

/// Container name for a job. Job ids are unique per server, so a name never
/// collides with another job's container.
pub fn container_name(job_id: &str) -> String {
    format!("doc-thor-build-{}", path_segment(job_id))
}

/// Run `image` with `source_dir` at `/repo` and `output_dir` at `/output`.
/// The returned logs are populated even when the run failed.
pub async fn run(
    sandbox: &Sandbox,
    job_id: &str,
    image: &str,
    source_dir: &Path,
    output_dir: &Path,
) -> SandboxRun {
    let spec = SandboxSpec {
        name: container_name(job_id),
        image: image.to_string(),
        source_dir: source_dir.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
    };
    let run = sandbox.run(&spec).await;
    tracing::debug!(
        image,
        container = %spec.name,
        log_bytes = run.logs.len(),
        ok = run.result.is_ok(),
        "Sandbox run finished"
    );
    run
}
