//! The build queue contract shared by every storage backend.
//!
//! A backend owns build records and their status transitions. Two guarantees
//! matter to callers:
//!
//! - [`BuildQueue::claim_next`] hands a pending build to exactly one caller,
//!   however many claim concurrently;
//! - [`BuildQueue::finalize`] succeeds at most once per build and rejects any
//!   attempt against a build that is not `running` with
//!   [`QueueError::Conflict`](crate::error::QueueError::Conflict).
//!
//! At most one version per project carries `is_latest`.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::QueueResult;
use crate::models::build::{Build, TerminalStatus};
use crate::models::project::{NewProject, Project, ProjectUpdate};
use crate::models::version::{Version, VersionUpdate};

/// A freshly claimed build together with the project that owns it.
#[derive(Debug, Clone)]
pub struct ClaimedBuild {
    pub build: Build,
    pub project: Project,
}

/// Terminal outcome reported by a builder.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildResult {
    pub status: TerminalStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Option<String>,
    /// Ref the builder actually checked out (the default branch when the
    /// build requested none).
    #[serde(default, rename = "ref")]
    pub resolved_ref: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl BuildResult {
    /// Drops empty strings so they are stored as NULL.
    pub fn normalized(mut self) -> Self {
        self.error = self.error.filter(|s| !s.is_empty());
        self.logs = self.logs.filter(|s| !s.is_empty());
        self.resolved_ref = self.resolved_ref.filter(|s| !s.is_empty());
        self
    }
}

/// Limit/offset pagination for build listings.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
        }
    }
}

impl Page {
    /// Builds a page from optional query values, ignoring nonsensical ones.
    pub fn from_query(limit: Option<i64>, offset: Option<i64>) -> Self {
        let default = Self::default();
        Self {
            limit: limit.filter(|l| *l > 0).unwrap_or(default.limit),
            offset: offset.filter(|o| *o >= 0).unwrap_or(default.offset),
        }
    }
}

#[async_trait]
pub trait BuildQueue: Send + Sync {
    async fn create_project(&self, new_project: NewProject) -> QueueResult<Project>;

    async fn list_projects(&self) -> QueueResult<Vec<Project>>;

    async fn get_project(&self, slug: &str) -> QueueResult<Project>;

    async fn update_project(&self, slug: &str, update: ProjectUpdate) -> QueueResult<Project>;

    /// Removes a project along with its builds and versions.
    async fn delete_project(&self, slug: &str) -> QueueResult<()>;

    /// Adds a `pending` build for a project.
    async fn enqueue(&self, project_id: i64, source_ref: String, tag: String)
        -> QueueResult<Build>;

    /// Atomically moves the oldest `pending` build to `running`.
    ///
    /// `Ok(None)` means the queue is empty, the normal idle state.
    async fn claim_next(&self) -> QueueResult<Option<ClaimedBuild>>;

    /// Records the terminal outcome of a `running` build. A successful build
    /// with a non-empty tag publishes a version for that tag.
    async fn finalize(&self, build_id: i64, result: BuildResult) -> QueueResult<Build>;

    async fn get_build(&self, project_id: i64, build_id: i64) -> QueueResult<Build>;

    /// Builds of a project, newest first.
    async fn list_builds(&self, project_id: i64, page: Page) -> QueueResult<Vec<Build>>;

    async fn list_versions(&self, project_id: i64) -> QueueResult<Vec<Version>>;

    /// Publishes, unpublishes or promotes a version. Promoting a version to
    /// latest clears the flag on every other version of the project.
    async fn update_version(
        &self,
        project_id: i64,
        tag: &str,
        update: VersionUpdate,
    ) -> QueueResult<Version>;
}
