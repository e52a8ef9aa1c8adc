//! PostgreSQL build queue.
//!
//! Claiming uses `SELECT ... FOR UPDATE SKIP LOCKED` inside a transaction, so
//! concurrent claimers never block on, or both receive, the same row.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use crate::error::{QueueError, QueueResult};
use crate::models::build::{Build, BuildStatus, NewBuild};
use crate::models::project::{NewProject, Project, ProjectUpdate};
use crate::models::version::{NewVersion, Version, VersionUpdate};
use crate::schema::{builds, projects, versions};
use crate::services::queue::{BuildQueue, BuildResult, ClaimedBuild, Page};

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct PgBuildQueue {
    pool: DbPool,
}

impl PgBuildQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Build a deadpool-backed connection pool for `database_url`.
    pub fn connect(database_url: &str, max_connections: usize) -> anyhow::Result<Self> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(manager).max_size(max_connections).build()?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn conn(&self) -> QueueResult<Object<AsyncPgConnection>> {
        self.pool
            .get()
            .await
            .map_err(|e| QueueError::Pool(e.to_string()))
    }
}

#[async_trait]
impl BuildQueue for PgBuildQueue {
    async fn create_project(&self, new_project: NewProject) -> QueueResult<Project> {
        let mut conn = self.conn().await?;
        let slug = new_project.slug.clone();

        let result = diesel::insert_into(projects::table)
            .values(&new_project)
            .returning(Project::as_returning())
            .get_result(&mut conn)
            .await;

        match result {
            Ok(project) => Ok(project),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Err(QueueError::AlreadyExists(format!("project {slug}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_projects(&self) -> QueueResult<Vec<Project>> {
        let mut conn = self.conn().await?;
        let results = projects::table
            .order(projects::slug.asc())
            .select(Project::as_select())
            .load(&mut conn)
            .await?;
        Ok(results)
    }

    async fn get_project(&self, slug: &str) -> QueueResult<Project> {
        let mut conn = self.conn().await?;
        projects::table
            .filter(projects::slug.eq(slug))
            .select(Project::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .ok_or(QueueError::NotFound("project"))
    }

    async fn update_project(&self, slug: &str, update: ProjectUpdate) -> QueueResult<Project> {
        let mut conn = self.conn().await?;
        diesel::update(projects::table.filter(projects::slug.eq(slug)))
            .set(&update)
            .returning(Project::as_returning())
            .get_result(&mut conn)
            .await
            .optional()?
            .ok_or(QueueError::NotFound("project"))
    }

    async fn delete_project(&self, slug: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        // Builds and versions go with it through ON DELETE CASCADE.
        let deleted = diesel::delete(projects::table.filter(projects::slug.eq(slug)))
            .execute(&mut conn)
            .await?;
        if deleted == 0 {
            return Err(QueueError::NotFound("project"));
        }
        Ok(())
    }

    async fn enqueue(
        &self,
        project_id: i64,
        source_ref: String,
        tag: String,
    ) -> QueueResult<Build> {
        let mut conn = self.conn().await?;
        let build = diesel::insert_into(builds::table)
            .values(&NewBuild::pending(project_id, source_ref, tag))
            .returning(Build::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(build)
    }

    async fn claim_next(&self) -> QueueResult<Option<ClaimedBuild>> {
        let mut conn = self.conn().await?;

        conn.transaction::<_, QueueError, _>(|conn| {
            async move {
                let candidate: Option<i64> = builds::table
                    .filter(builds::status.eq(BuildStatus::Pending.as_str()))
                    .order((builds::created_at.asc(), builds::id.asc()))
                    .select(builds::id)
                    .for_update()
                    .skip_locked()
                    .first(conn)
                    .await
                    .optional()?;

                let Some(build_id) = candidate else {
                    return Ok(None);
                };

                let build = diesel::update(builds::table.find(build_id))
                    .set((
                        builds::status.eq(BuildStatus::Running.as_str()),
                        builds::started_at.eq(Utc::now()),
                    ))
                    .returning(Build::as_returning())
                    .get_result(conn)
                    .await?;

                let project = projects::table
                    .find(build.project_id)
                    .select(Project::as_select())
                    .first(conn)
                    .await?;

                Ok(Some(ClaimedBuild { build, project }))
            }
            .scope_boxed()
        })
        .await
    }

    async fn finalize(&self, build_id: i64, result: BuildResult) -> QueueResult<Build> {
        let mut conn = self.conn().await?;
        let result = result.normalized();

        conn.transaction::<_, QueueError, _>(|conn| {
            async move {
                let current: Build = builds::table
                    .find(build_id)
                    .select(Build::as_select())
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?
                    .ok_or(QueueError::NotFound("build"))?;

                if !current.is_running() {
                    return Err(QueueError::Conflict(build_id));
                }

                let status = BuildStatus::from(result.status);
                let source_ref = result.resolved_ref.unwrap_or(current.source_ref);

                let build = diesel::update(builds::table.find(build_id))
                    .set((
                        builds::status.eq(status.as_str()),
                        builds::logs.eq(result.logs),
                        builds::error.eq(result.error),
                        builds::source_ref.eq(source_ref),
                        builds::finished_at.eq(Utc::now()),
                    ))
                    .returning(Build::as_returning())
                    .get_result(conn)
                    .await?;

                if status == BuildStatus::Success && !build.tag.is_empty() {
                    // Rebuilding a tag republishes it from the newer build.
                    diesel::insert_into(versions::table)
                        .values(&NewVersion::published(
                            build.project_id,
                            build.id,
                            build.tag.clone(),
                        ))
                        .on_conflict((versions::project_id, versions::tag))
                        .do_update()
                        .set((
                            versions::build_id.eq(build.id),
                            versions::published.eq(true),
                        ))
                        .execute(conn)
                        .await?;
                }

                Ok(build)
            }
            .scope_boxed()
        })
        .await
    }

    async fn get_build(&self, project_id: i64, build_id: i64) -> QueueResult<Build> {
        let mut conn = self.conn().await?;
        builds::table
            .filter(builds::id.eq(build_id))
            .filter(builds::project_id.eq(project_id))
            .select(Build::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .ok_or(QueueError::NotFound("build"))
    }

    async fn list_builds(&self, project_id: i64, page: Page) -> QueueResult<Vec<Build>> {
        let mut conn = self.conn().await?;
        let results = builds::table
            .filter(builds::project_id.eq(project_id))
            .order((builds::created_at.desc(), builds::id.desc()))
            .limit(page.limit)
            .offset(page.offset)
            .select(Build::as_select())
            .load(&mut conn)
            .await?;
        Ok(results)
    }

    async fn list_versions(&self, project_id: i64) -> QueueResult<Vec<Version>> {
        let mut conn = self.conn().await?;
        let results = versions::table
            .filter(versions::project_id.eq(project_id))
            .order(versions::created_at.asc())
            .select(Version::as_select())
            .load(&mut conn)
            .await?;
        Ok(results)
    }

    async fn update_version(
        &self,
        project_id: i64,
        tag: &str,
        update: VersionUpdate,
    ) -> QueueResult<Version> {
        let mut conn = self.conn().await?;
        let tag = tag.to_string();

        conn.transaction::<_, QueueError, _>(|conn| {
            async move {
                // Serializes promotions within a project.
                projects::table
                    .find(project_id)
                    .select(projects::id)
                    .for_update()
                    .first::<i64>(conn)
                    .await
                    .optional()?
                    .ok_or(QueueError::NotFound("project"))?;

                let current: Version = versions::table
                    .filter(versions::project_id.eq(project_id))
                    .filter(versions::tag.eq(&tag))
                    .select(Version::as_select())
                    .first(conn)
                    .await
                    .optional()?
                    .ok_or(QueueError::NotFound("version"))?;

                if update.promotes() {
                    diesel::update(
                        versions::table
                            .filter(versions::project_id.eq(project_id))
                            .filter(versions::id.ne(current.id))
                            .filter(versions::is_latest.eq(true)),
                    )
                    .set(versions::is_latest.eq(false))
                    .execute(conn)
                    .await?;
                }

                let version = diesel::update(versions::table.find(current.id))
                    .set(&update)
                    .returning(Version::as_returning())
                    .get_result(conn)
                    .await?;
                Ok(version)
            }
            .scope_boxed()
        })
        .await
    }
}
