//! Static bearer-token checks for the builder and management surfaces.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};

use crate::error::ApiError;

/// Expected token, stored as its SHA-256 digest.
#[derive(Clone)]
pub struct TokenGuard {
    digest: Option<String>,
}

impl TokenGuard {
    /// An empty token configures a guard that admits nobody.
    pub fn new(token: &str) -> Self {
        let digest = (!token.is_empty()).then(|| hash_token(token));
        Self { digest }
    }

    pub fn admits(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.digest else {
            return false;
        };
        let presented = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty());

        // Digests have a fixed length, so comparison time does not depend on
        // how much of the raw token matched.
        presented.is_some_and(|token| hash_token(token) == *expected)
    }
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// `axum::middleware::from_fn_with_state` entry point.
pub async fn require_token(
    State(guard): State<TokenGuard>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !guard.admits(request.headers()) {
        tracing::debug!(path = %request.uri().path(), "Rejected request without valid token");
        return Err(ApiError::unauthorized());
    }
    Ok(next.run(request).await)
}
