//! Queue server configuration: loaded from environment variables.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Bearer token builders present on the claim/report endpoints.
    pub builder_token: String,
    /// Bearer token for the project/build management endpoints.
    pub api_token: String,
    /// Maximum pooled database connections.
    pub db_max_connections: usize,
    /// Upper bound on a single HTTP request.
    pub request_timeout: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let builder_token = std::env::var("BUILDER_TOKEN").unwrap_or_default();
        let api_token = std::env::var("API_TOKEN").unwrap_or_default();
        let db_max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        let request_timeout_secs = std::env::var("REQUEST_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        if builder_token.is_empty() {
            tracing::warn!("BUILDER_TOKEN not set -- builder endpoints will reject every request");
        }
        if api_token.is_empty() {
            tracing::warn!("API_TOKEN not set -- management endpoints will reject every request");
        }

        Self {
            builder_token,
            api_token,
            db_max_connections,
            request_timeout: Duration::from_secs(request_timeout_secs),
        }
    }
}
