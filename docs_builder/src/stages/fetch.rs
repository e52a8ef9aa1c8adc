//! Fetch: shallow-clone the project's sources.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::{timeout_at, Instant};

/// Upper bound for the whole fetch, clone and branch detection together.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("git clone timed out after {0:?}")]
    Timeout(Duration),
    #[error("detect default branch timed out after {0:?}")]
    DefaultBranchTimeout(Duration),
    #[error("git clone: {0}")]
    Clone(String),
    #[error("detect default branch: {0}")]
    DefaultBranch(String),
    #[error("spawn git: {0}")]
    Spawn(#[from] std::io::Error),
}

fn git() -> Command {
    let mut cmd = Command::new("git");
    cmd.env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .kill_on_drop(true);
    cmd
}

/// Clone `source_url` at `source_ref` into `dest` and return the ref that was
/// actually checked out.
///
/// Only named refs (branches and tags) are supported. An empty ref clones the
/// remote's default branch and returns its name.
pub async fn run(
    source_url: &str,
    source_ref: &str,
    dest: &Path,
    limit: Duration,
) -> Result<String, FetchError> {
    let deadline = Instant::now() + limit;

    let mut clone = git();
    clone.arg("clone").arg("--depth=1");
    if !source_ref.is_empty() {
        clone.arg("--branch").arg(source_ref);
    }
    clone.arg("--").arg(source_url).arg(dest);

    let output = timeout_at(deadline, clone.output())
        .await
        .map_err(|_| FetchError::Timeout(limit))??;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FetchError::Clone(format!("{}: {}", output.status, stderr.trim())));
    }

    if !source_ref.is_empty() {
        return Ok(source_ref.to_string());
    }
    default_branch(dest, deadline, limit).await
}

/// Name of the branch checked out in `dest`.
async fn default_branch(dest: &Path, deadline: Instant, limit: Duration) -> Result<String, FetchError> {
    let mut head = git();
    head.arg("-C")
        .arg(dest)
        .args(["rev-parse", "--abbrev-ref", "HEAD"]);
    let output = timeout_at(deadline, head.output())
        .await
        .map_err(|_| FetchError::DefaultBranchTimeout(limit))??;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FetchError::DefaultBranch(stderr.trim().to_string()));
    }

    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if branch.is_empty() || branch == "HEAD" {
        return Err(FetchError::DefaultBranch("remote HEAD is detached".into()));
    }
    Ok(branch)
}


#[cfg(test)]
mod tests {
    use super::testing::init_repo;
    use super::*;

    #[tokio::test]
    async fn empty_ref_resolves_default_branch() {
        let remote = tempfile::tempdir().unwrap();
        let url = init_repo(remote.path(), "trunk");
        let work = tempfile::tempdir().unwrap();
        let dest = work.path().join("src");

        let resolved = run(&url, "", &dest, FETCH_TIMEOUT).await.unwrap();

        assert_eq!(resolved, "trunk");
        assert!(dest.join("mkdocs.yml").exists());
    }

    #[tokio::test]
    async fn named_branch_and_tag_are_returned_as_given() {
        let remote = tempfile::tempdir().unwrap();
        let url = init_repo(remote.path(), "main");
        let work = tempfile::tempdir().unwrap();

        let resolved = run(&url, "release", &work.path().join("a"), FETCH_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(resolved, "release");

        let resolved = run(&url, "v1.0.0", &work.path().join("b"), FETCH_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(resolved, "v1.0.0");
    }

    #[tokio::test]
    async fn unknown_ref_fails_the_clone() {
        let remote = tempfile::tempdir().unwrap();
        let url = init_repo(remote.path(), "main");
        let work = tempfile::tempdir().unwrap();

        let err = run(&url, "no-such-branch", &work.path().join("src"), FETCH_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Clone(_)), "{err}");
    }

    #[tokio::test]
    async fn unreachable_source_fails_the_clone() {
        let work = tempfile::tempdir().unwrap();
        let missing = format!("file://{}/nothing-here", work.path().display());

        let err = run(&missing, "", &work.path().join("src"), FETCH_TIMEOUT)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("git clone:"), "{err}");
    }

    #[tokio::test]
    async fn default_branch_step_reports_its_own_timeout() {
        let remote = tempfile::tempdir().unwrap();
        let url = init_repo(remote.path(), "main");
        let work = tempfile::tempdir().unwrap();
        let dest = work.path().join("src");
        run(&url, "release", &dest, FETCH_TIMEOUT).await.unwrap();

        let err = default_branch(&dest, Instant::now(), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::DefaultBranchTimeout(_)), "{err}");
        assert_eq!(err.to_string(), "detect default branch timed out after 0ns");
    }
}
