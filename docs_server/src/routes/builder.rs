//! Builder-facing endpoints: claim the next job, report its outcome.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use crate::error::{ApiError, QueueError};
use crate::models::build::{Build, BuildStatus};
use crate::routes::AppState;
use crate::services::queue::{BuildResult, ClaimedBuild};

/// Job payload handed to a builder.
#[derive(Debug, Serialize)]
pub struct JobPayload {
    pub id: String,
    pub project_slug: String,
    pub version: String,
    pub source_url: String,
    #[serde(rename = "ref")]
    pub source_ref: String,
    pub docker_image: String,
}

impl From<ClaimedBuild> for JobPayload {
    fn from(claimed: ClaimedBuild) -> Self {
        Self {
            id: claimed.build.id.to_string(),
            project_slug: claimed.project.slug,
            version: claimed.build.tag,
            source_url: claimed.project.source_url,
            source_ref: claimed.build.source_ref,
            docker_image: claimed.project.docker_image,
        }
    }
}

/// `GET /builds/pending`: claim the oldest pending build, or 204 when idle.
pub async fn claim_pending(State(state): State<AppState>) -> Result<Response, ApiError> {
    match state.queue.claim_next().await {
        Ok(Some(claimed)) => {
            crate::metrics::claim_attempt("claimed");
            crate::metrics::build_status_changed(BuildStatus::Running.as_str());
            tracing::info!(
                build_id = claimed.build.id,
                project = %claimed.project.slug,
                tag = %claimed.build.tag,
                "Build claimed"
            );
            Ok((StatusCode::OK, Json(JobPayload::from(claimed))).into_response())
        }
        Ok(None) => {
            crate::metrics::claim_attempt("empty");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        Err(e) => {
            crate::metrics::claim_attempt("error");
            Err(e.into())
        }
    }
}

/// `POST /builds/{id}/result`: finalize a running build.
pub async fn report_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<BuildResult>, JsonRejection>,
) -> Result<Json<Build>, ApiError> {
    let build_id: i64 = id
        .parse()
        .map_err(|_| ApiError::bad_request("invalid build id"))?;
    let Json(result) = body.map_err(|rejection| {
        tracing::debug!(build_id, error = %rejection, "Malformed build report");
        // Anything but an oversized body is the builder's fault and final.
        let status = match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        ApiError::new(
            status,
            format!("invalid request body: {}", rejection.body_text()),
        )
    })?;
    let duration_ms = result.duration_ms;

    match state.queue.finalize(build_id, result).await {
        Ok(build) => {
            crate::metrics::build_status_changed(&build.status);
            if let Some(ms) = duration_ms {
                crate::metrics::build_duration(ms);
            }
            tracing::info!(
                build_id,
                status = %build.status,
                source_ref = %build.source_ref,
                duration_ms,
                "Build finalized"
            );
            Ok(Json(build))
        }
        Err(QueueError::NotFound(what)) => {
            crate::metrics::report_rejected("not_found");
            tracing::warn!(build_id, "Report for unknown build");
            Err(QueueError::NotFound(what).into())
        }
        Err(QueueError::Conflict(_)) => {
            crate::metrics::report_rejected("conflict");
            tracing::warn!(build_id, "Late or duplicate report for a build that is not running");
            Err(QueueError::Conflict(build_id).into())
        }
        Err(e) => Err(e.into()),
    }
}
