//! In-process build queue.
//!
//! All state sits behind one async mutex, so every operation is serialized and
//! a claim can never be observed half-done. Used by `--ephemeral` mode and the
//! test suite; nothing survives a restart.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{QueueError, QueueResult};
use crate::models::build::{Build, BuildStatus};
use crate::models::project::{NewProject, Project, ProjectUpdate};
use crate::models::version::{Version, VersionUpdate};
use crate::services::queue::{BuildQueue, BuildResult, ClaimedBuild, Page};

#[derive(Default)]
pub struct MemoryBuildQueue {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    projects: Vec<Project>,
    builds: Vec<Build>,
    versions: Vec<Version>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl MemoryBuildQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BuildQueue for MemoryBuildQueue {
    async fn create_project(&self, new_project: NewProject) -> QueueResult<Project> {
        let mut state = self.state.lock().await;
        if state.projects.iter().any(|p| p.slug == new_project.slug) {
            return Err(QueueError::AlreadyExists(format!(
                "project {}",
                new_project.slug
            )));
        }

        let project = Project {
            id: state.next_id(),
            slug: new_project.slug,
            name: new_project.name,
            source_url: new_project.source_url,
            docker_image: new_project.docker_image,
            created_at: Utc::now(),
        };
        state.projects.push(project.clone());
        Ok(project)
    }

    async fn list_projects(&self) -> QueueResult<Vec<Project>> {
        let state = self.state.lock().await;
        let mut projects = state.projects.clone();
        projects.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(projects)
    }

    async fn get_project(&self, slug: &str) -> QueueResult<Project> {
        let state = self.state.lock().await;
        state
            .projects
            .iter()
            .find(|p| p.slug == slug)
            .cloned()
            .ok_or(QueueError::NotFound("project"))
    }

    async fn update_project(&self, slug: &str, update: ProjectUpdate) -> QueueResult<Project> {
        let mut state = self.state.lock().await;
        let project = state
            .projects
            .iter_mut()
            .find(|p| p.slug == slug)
            .ok_or(QueueError::NotFound("project"))?;
        update.apply(project);
        Ok(project.clone())
    }

    async fn delete_project(&self, slug: &str) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let index = state
            .projects
            .iter()
            .position(|p| p.slug == slug)
            .ok_or(QueueError::NotFound("project"))?;
        let project = state.projects.remove(index);
        state.builds.retain(|b| b.project_id != project.id);
        state.versions.retain(|v| v.project_id != project.id);
        Ok(())
    }

    async fn enqueue(
        &self,
        project_id: i64,
        source_ref: String,
        tag: String,
    ) -> QueueResult<Build> {
        let mut state = self.state.lock().await;
        if !state.projects.iter().any(|p| p.id == project_id) {
            return Err(QueueError::NotFound("project"));
        }

        let build = Build {
            id: state.next_id(),
            project_id,
            source_ref,
            tag,
            status: BuildStatus::Pending.as_str().to_string(),
            logs: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        state.builds.push(build.clone());
        Ok(build)
    }

    async fn claim_next(&self) -> QueueResult<Option<ClaimedBuild>> {
        let mut state = self.state.lock().await;

        let oldest = state
            .builds
            .iter_mut()
            .filter(|b| b.status() == Some(BuildStatus::Pending))
            .min_by_key(|b| (b.created_at, b.id));

        let Some(build) = oldest else {
            return Ok(None);
        };

        build.status = BuildStatus::Running.as_str().to_string();
        build.started_at = Some(Utc::now());
        let build = build.clone();

        let project = state
            .projects
            .iter()
            .find(|p| p.id == build.project_id)
            .cloned()
            .ok_or(QueueError::NotFound("project"))?;

        Ok(Some(ClaimedBuild { build, project }))
    }

    async fn finalize(&self, build_id: i64, result: BuildResult) -> QueueResult<Build> {
        let mut state = self.state.lock().await;
        let result = result.normalized();

        let build = state
            .builds
            .iter_mut()
            .find(|b| b.id == build_id)
            .ok_or(QueueError::NotFound("build"))?;

        if !build.is_running() {
            return Err(QueueError::Conflict(build_id));
        }

        let status = BuildStatus::from(result.status);
        build.status = status.as_str().to_string();
        build.logs = result.logs;
        build.error = result.error;
        if let Some(resolved) = result.resolved_ref {
            build.source_ref = resolved;
        }
        build.finished_at = Some(Utc::now());
        let build = build.clone();

        if status == BuildStatus::Success && !build.tag.is_empty() {
            let existing = state
                .versions
                .iter()
                .position(|v| v.project_id == build.project_id && v.tag == build.tag);
            match existing {
                Some(index) => {
                    let version = &mut state.versions[index];
                    version.build_id = build.id;
                    version.published = true;
                }
                None => {
                    let version = Version {
                        id: state.next_id(),
                        project_id: build.project_id,
                        build_id: build.id,
                        tag: build.tag.clone(),
                        published: true,
                        is_latest: false,
                        created_at: Utc::now(),
                    };
                    state.versions.push(version);
                }
            }
        }

        Ok(build)
    }

    async fn get_build(&self, project_id: i64, build_id: i64) -> QueueResult<Build> {
        let state = self.state.lock().await;
        state
            .builds
            .iter()
            .find(|b| b.id == build_id && b.project_id == project_id)
            .cloned()
            .ok_or(QueueError::NotFound("build"))
    }

    async fn list_builds(&self, project_id: i64, page: Page) -> QueueResult<Vec<Build>> {
        let state = self.state.lock().await;
        let mut builds: Vec<Build> = state
            .builds
            .iter()
            .filter(|b| b.project_id == project_id)
            .cloned()
            .collect();
        builds.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(builds
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn list_versions(&self, project_id: i64) -> QueueResult<Vec<Version>> {
        let state = self.state.lock().await;
        Ok(state
            .versions
            .iter()
            .filter(|v| v.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn update_version(
        &self,
        project_id: i64,
        tag: &str,
        update: VersionUpdate,
    ) -> QueueResult<Version> {
        let mut state = self.state.lock().await;
        let index = state
            .versions
            .iter()
            .position(|v| v.project_id == project_id && v.tag == tag)
            .ok_or(QueueError::NotFound("version"))?;

        if update.promotes() {
            for other in state.versions.iter_mut().filter(|v| v.project_id == project_id) {
                other.is_latest = false;
            }
        }
        let version = &mut state.versions[index];
        update.apply(version);
        Ok(version.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::build::TerminalStatus;

    async fn queue_with_project() -> (MemoryBuildQueue, Project) {
        let queue = MemoryBuildQueue::new();
        let project = queue
            .create_project(NewProject {
                slug: "handbook".into(),
                name: "Handbook".into(),
                source_url: "https://git.example.com/handbook.git".into(),
                docker_image: "ghcr.io/example/mkdocs:1".into(),
            })
            .await
            .unwrap();
        (queue, project)
    }

    fn result(status: TerminalStatus) -> BuildResult {
        BuildResult {
            status,
            error: None,
            logs: Some("building...\ndone".into()),
            resolved_ref: None,
            duration_ms: Some(1200),
        }
    }

    #[tokio::test]
    async fn claim_on_empty_queue_is_none() {
        let (queue, _) = queue_with_project().await;
        assert!(queue.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_takes_oldest_pending_and_marks_it_running() {
        let (queue, project) = queue_with_project().await;
        let first = queue
            .enqueue(project.id, "main".into(), "v1".into())
            .await
            .unwrap();
        let second = queue
            .enqueue(project.id, "main".into(), "v2".into())
            .await
            .unwrap();
        assert!(first.started_at.is_none());

        let claimed = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.build.id, first.id);
        assert_eq!(claimed.build.status(), Some(BuildStatus::Running));
        assert!(claimed.build.started_at.is_some());
        assert!(claimed.build.finished_at.is_none());
        assert_eq!(claimed.project.slug, "handbook");

        let next = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(next.build.id, second.id);
        assert!(queue.claim_next().await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_hand_out_a_build_once() {
        let (queue, project) = queue_with_project().await;
        queue
            .enqueue(project.id, String::new(), "v1.0.0".into())
            .await
            .unwrap();
        let queue = Arc::new(queue);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move { queue.claim_next().await }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn finalize_success_with_tag_publishes_version() {
        let (queue, project) = queue_with_project().await;
        let build = queue
            .enqueue(project.id, String::new(), "v1.0.0".into())
            .await
            .unwrap();
        queue.claim_next().await.unwrap().unwrap();

        let mut report = result(TerminalStatus::Success);
        report.resolved_ref = Some("main".into());
        let done = queue.finalize(build.id, report).await.unwrap();

        assert_eq!(done.status(), Some(BuildStatus::Success));
        assert_eq!(done.source_ref, "main");
        assert!(done.finished_at.is_some());

        let versions = queue.list_versions(project.id).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].tag, "v1.0.0");
        assert_eq!(versions[0].build_id, build.id);
        assert!(versions[0].published);
        assert!(!versions[0].is_latest);
    }

    #[tokio::test]
    async fn failed_or_untagged_builds_publish_nothing() {
        let (queue, project) = queue_with_project().await;
        let tagged = queue
            .enqueue(project.id, "main".into(), "v2".into())
            .await
            .unwrap();
        let untagged = queue
            .enqueue(project.id, "main".into(), String::new())
            .await
            .unwrap();
        queue.claim_next().await.unwrap();
        queue.claim_next().await.unwrap();

        queue
            .finalize(tagged.id, result(TerminalStatus::Failed))
            .await
            .unwrap();
        queue
            .finalize(untagged.id, result(TerminalStatus::Success))
            .await
            .unwrap();

        assert!(queue.list_versions(project.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_finalize_conflicts_without_mutating() {
        let (queue, project) = queue_with_project().await;
        let build = queue
            .enqueue(project.id, "main".into(), "v1".into())
            .await
            .unwrap();
        queue.claim_next().await.unwrap();
        let first = queue
            .finalize(build.id, result(TerminalStatus::Success))
            .await
            .unwrap();

        let mut late = result(TerminalStatus::Failed);
        late.error = Some("late report".into());
        let err = queue.finalize(build.id, late).await.unwrap_err();
        assert!(matches!(err, QueueError::Conflict(id) if id == build.id));

        let stored = queue.get_build(project.id, build.id).await.unwrap();
        assert_eq!(stored.status(), Some(BuildStatus::Success));
        assert_eq!(stored.error, None);
        assert_eq!(stored.finished_at, first.finished_at);
    }

    #[tokio::test]
    async fn finalize_rejects_pending_and_unknown_builds() {
        let (queue, project) = queue_with_project().await;
        let build = queue
            .enqueue(project.id, "main".into(), String::new())
            .await
            .unwrap();

        let err = queue
            .finalize(build.id, result(TerminalStatus::Success))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Conflict(_)));

        let err = queue
            .finalize(9999, result(TerminalStatus::Success))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NotFound("build")));
    }

    #[tokio::test]
    async fn duplicate_project_slug_is_rejected() {
        let (queue, _) = queue_with_project().await;
        let err = queue
            .create_project(NewProject {
                slug: "handbook".into(),
                name: "Other".into(),
                source_url: "https://git.example.com/other.git".into(),
                docker_image: "img".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn list_builds_is_newest_first_and_paged() {
        let (queue, project) = queue_with_project().await;
        let mut ids = Vec::new();
        for tag in ["a", "b", "c"] {
            ids.push(
                queue
                    .enqueue(project.id, "main".into(), tag.into())
                    .await
                    .unwrap()
                    .id,
            );
        }

        let page = queue
            .list_builds(project.id, Page { limit: 2, offset: 0 })
            .await
            .unwrap();
        let listed: Vec<i64> = page.iter().map(|b| b.id).collect();
        assert_eq!(listed, vec![ids[2], ids[1]]);

        let rest = queue
            .list_builds(project.id, Page { limit: 2, offset: 2 })
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, ids[0]);
    }

    async fn published_version(queue: &MemoryBuildQueue, project: &Project, tag: &str) {
        let build = queue
            .enqueue(project.id, "main".into(), tag.into())
            .await
            .unwrap();
        queue.claim_next().await.unwrap().unwrap();
        queue
            .finalize(build.id, result(TerminalStatus::Success))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn promoting_a_version_leaves_one_latest_per_project() {
        let (queue, project) = queue_with_project().await;
        published_version(&queue, &project, "v1").await;
        published_version(&queue, &project, "v2").await;
        let promote = VersionUpdate {
            is_latest: Some(true),
            ..Default::default()
        };

        let v1 = queue
            .update_version(project.id, "v1", promote.clone())
            .await
            .unwrap();
        assert!(v1.is_latest);
        let v2 = queue.update_version(project.id, "v2", promote).await.unwrap();
        assert!(v2.is_latest);

        let latest: Vec<String> = queue
            .list_versions(project.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|v| v.is_latest)
            .map(|v| v.tag)
            .collect();
        assert_eq!(latest, vec!["v2"]);
    }

    #[tokio::test]
    async fn unpublish_keeps_other_flags() {
        let (queue, project) = queue_with_project().await;
        published_version(&queue, &project, "v1").await;
        queue
            .update_version(
                project.id,
                "v1",
                VersionUpdate {
                    is_latest: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let v1 = queue
            .update_version(
                project.id,
                "v1",
                VersionUpdate {
                    published: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!v1.published);
        assert!(v1.is_latest);

        let err = queue
            .update_version(project.id, "v9", VersionUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NotFound("version")));
    }

    #[tokio::test]
    async fn project_update_and_delete() {
        let (queue, project) = queue_with_project().await;
        published_version(&queue, &project, "v1").await;

        let updated = queue
            .update_project(
                "handbook",
                ProjectUpdate {
                    docker_image: Some("ghcr.io/example/mkdocs:2".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.docker_image, "ghcr.io/example/mkdocs:2");
        assert_eq!(updated.name, "Handbook");
        assert_eq!(updated.slug, "handbook");

        queue.delete_project("handbook").await.unwrap();
        assert!(matches!(
            queue.get_project("handbook").await.unwrap_err(),
            QueueError::NotFound("project")
        ));
        assert!(queue.list_versions(project.id).await.unwrap().is_empty());
        assert!(queue
            .list_builds(project.id, Page::default())
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            queue.delete_project("handbook").await.unwrap_err(),
            QueueError::NotFound("project")
        ));
    }
}
