//! Management API: projects, build triggers, builds and versions.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;

use crate::error::ApiError;
use crate::models::build::Build;
use crate::models::project::{NewProject, Project, ProjectUpdate};
use crate::models::version::{Version, VersionUpdate};
use crate::routes::AppState;
use crate::services::queue::Page;

/// Request body for triggering a build. Both fields are optional: an empty
/// ref builds the default branch, an empty tag publishes no version.
#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    #[serde(default, rename = "ref")]
    pub source_ref: String,
    #[serde(default)]
    pub tag: String,
}

#[derive(Debug, Deserialize)]
pub struct ListBuildsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Slugs and tags become object-store key segments.
fn is_key_segment(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

pub async fn create_project(
    State(state): State<AppState>,
    Json(req): Json<NewProject>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    if !is_key_segment(&req.slug) {
        return Err(ApiError::bad_request(
            "slug may only contain letters, digits, '-', '_' and '.'",
        ));
    }
    if req.source_url.is_empty() || req.docker_image.is_empty() {
        return Err(ApiError::bad_request("source_url and docker_image are required"));
    }

    let project = state.queue.create_project(req).await?;
    tracing::info!(project = %project.slug, "Project created");
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn list_projects(State(state): State<AppState>) -> Result<Json<Vec<Project>>, ApiError> {
    Ok(Json(state.queue.list_projects().await?))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Project>, ApiError> {
    Ok(Json(state.queue.get_project(&slug).await?))
}

pub async fn update_project(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(update): Json<ProjectUpdate>,
) -> Result<Json<Project>, ApiError> {
    if update.is_empty() {
        return Err(ApiError::bad_request("nothing to update"));
    }
    let blank = |field: &Option<String>| field.as_deref().is_some_and(str::is_empty);
    if blank(&update.source_url) || blank(&update.docker_image) {
        return Err(ApiError::bad_request("source_url and docker_image must not be empty"));
    }

    let project = state.queue.update_project(&slug, update).await?;
    tracing::info!(project = %project.slug, "Project updated");
    Ok(Json(project))
}

/// Deleting a project drops its builds and versions. Published artifacts
/// stay in the store.
pub async fn delete_project(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.queue.delete_project(&slug).await?;
    tracing::info!(project = %slug, "Project deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Enqueue a build. An empty body is accepted.
pub async fn trigger_build(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Build>), ApiError> {
    let req: TriggerRequest = if body.is_empty() {
        TriggerRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|_| ApiError::bad_request("invalid request body"))?
    };
    if !req.tag.is_empty() && !is_key_segment(&req.tag) {
        return Err(ApiError::bad_request(
            "tag may only contain letters, digits, '-', '_' and '.'",
        ));
    }

    let project = state.queue.get_project(&slug).await?;
    let build = state
        .queue
        .enqueue(project.id, req.source_ref, req.tag)
        .await?;

    crate::metrics::build_status_changed(&build.status);
    tracing::info!(
        build_id = build.id,
        project = %project.slug,
        source_ref = %build.source_ref,
        tag = %build.tag,
        "Build created"
    );

    Ok((StatusCode::CREATED, Json(build)))
}

pub async fn list_builds(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<ListBuildsQuery>,
) -> Result<Json<Vec<Build>>, ApiError> {
    let project = state.queue.get_project(&slug).await?;
    let page = Page::from_query(query.limit, query.offset);
    Ok(Json(state.queue.list_builds(project.id, page).await?))
}

pub async fn get_build(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, String)>,
) -> Result<Json<Build>, ApiError> {
    let build_id: i64 = id
        .parse()
        .map_err(|_| ApiError::bad_request("invalid build id"))?;
    let project = state.queue.get_project(&slug).await?;
    Ok(Json(state.queue.get_build(project.id, build_id).await?))
}

pub async fn list_versions(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Vec<Version>>, ApiError> {
    let project = state.queue.get_project(&slug).await?;
    Ok(Json(state.queue.list_versions(project.id).await?))
}

/// Publish, unpublish or promote a version to latest.
pub async fn update_version(
    State(state): State<AppState>,
    Path((slug, tag)): Path<(String, String)>,
    Json(update): Json<VersionUpdate>,
) -> Result<Json<Version>, ApiError> {
    if update.is_empty() {
        return Err(ApiError::bad_request("nothing to update"));
    }

    let project = state.queue.get_project(&slug).await?;
    let version = state.queue.update_version(project.id, &tag, update).await?;
    tracing::info!(
        project = %project.slug,
        version = %version.tag,
        published = version.published,
        is_latest = version.is_latest,
        "Version updated"
    );
    Ok(Json(version))
}
