//! HTTP routes: builder protocol and management API.

pub mod api;
pub mod builder;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::Json;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{require_token, TokenGuard};
use crate::config::ServerConfig;
use crate::services::queue::BuildQueue;

/// Largest build report accepted. Builders keep only the tail of their logs
/// so a report stays well below this.
pub const REPORT_BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Shared state for route handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn BuildQueue>,
}

/// Build the server's Axum router.
pub fn app_router(state: AppState, config: &ServerConfig) -> Router {
    let builder_routes = Router::new()
        .route("/builds/pending", get(builder::claim_pending))
        .route(
            "/builds/{id}/result",
            post(builder::report_result).layer(DefaultBodyLimit::max(REPORT_BODY_LIMIT)),
        )
        .route_layer(middleware::from_fn_with_state(
            TokenGuard::new(&config.builder_token),
            require_token,
        ));

    let management_routes = Router::new()
        .route("/projects", get(api::list_projects).post(api::create_project))
        .route(
            "/projects/{slug}",
            get(api::get_project)
                .put(api::update_project)
                .delete(api::delete_project),
        )
        .route(
            "/projects/{slug}/builds",
            get(api::list_builds).post(api::trigger_build),
        )
        .route("/projects/{slug}/builds/{id}", get(api::get_build))
        .route("/projects/{slug}/versions", get(api::list_versions))
        .route("/projects/{slug}/versions/{version}", put(api::update_version))
        .route_layer(middleware::from_fn_with_state(
            TokenGuard::new(&config.api_token),
            require_token,
        ));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", builder_routes.merge(management_routes))
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}
