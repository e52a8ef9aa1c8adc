//! HTTP client for the queue server's builder endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A claimed build, as handed out by `GET /api/v1/builds/pending`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub project_slug: String,
    /// Version tag to publish under; may be empty.
    #[serde(default)]
    pub version: String,
    pub source_url: String,
    /// Named ref to build; empty means the remote's default branch.
    #[serde(default, rename = "ref")]
    pub source_ref: String,
    pub docker_image: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Failed,
}

/// Terminal outcome of a job, sent once to `POST /api/v1/builds/{id}/result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    /// The ref that was actually checked out.
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub resolved_ref: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Most log text carried by one report. The server accepts 16 MiB bodies;
/// only the tail of a longer log is sent.
pub const MAX_REPORT_LOG_BYTES: usize = 4 * 1024 * 1024;

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// Keep the last `limit` bytes of `logs` (rounded to a char boundary),
/// prefixed with a note saying how much was cut.
fn log_tail(logs: String, limit: usize) -> String {
    if logs.len() <= limit {
        return logs;
    }
    let mut start = logs.len() - limit;
    while !logs.is_char_boundary(start) {
        start += 1;
    }
    format!("[... {start} bytes truncated ...]\n{}", &logs[start..])
}

impl BuildReport {
    pub fn success(logs: String, resolved_ref: String, duration: Duration) -> Self {
        Self {
            status: ReportStatus::Success,
            error: None,
            logs: non_empty(log_tail(logs, MAX_REPORT_LOG_BYTES)),
            resolved_ref: non_empty(resolved_ref),
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn failed(error: String, logs: String, resolved_ref: String, duration: Duration) -> Self {
        Self {
            status: ReportStatus::Failed,
            error: Some(error),
            logs: non_empty(log_tail(logs, MAX_REPORT_LOG_BYTES)),
            resolved_ref: non_empty(resolved_ref),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The server refused the report for good (unknown build, not running,
    /// malformed). Retrying cannot succeed.
    #[error("report rejected with status {0}")]
    Rejected(StatusCode),
    #[error("unexpected status {0}")]
    UnexpectedStatus(StatusCode),
}

/// Builder's view of the job queue.
#[async_trait]
pub trait WorkQueue: Send + Sync + 'static {
    /// Claim the next pending job; `None` when the queue is empty.
    async fn claim(&self) -> Result<Option<Job>, ClientError>;
    async fn report(&self, job_id: &str, report: &BuildReport) -> Result<(), ClientError>;
}

pub struct QueueClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl QueueClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("doc-thor-builder/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl WorkQueue for QueueClient {
    async fn claim(&self) -> Result<Option<Job>, ClientError> {
        let response = self
            .http
            .get(format!("{}/api/v1/builds/pending", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::OK => Ok(Some(response.json::<Job>().await?)),
            status => Err(ClientError::UnexpectedStatus(status)),
        }
    }

    async fn report(&self, job_id: &str, report: &BuildReport) -> Result<(), ClientError> {
        let response = self
            .http
            .post(format!("{}/api/v1/builds/{job_id}/result", self.base_url))
            .bearer_auth(&self.token)
            .json(report)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            status @ (StatusCode::BAD_REQUEST
            | StatusCode::NOT_FOUND
            | StatusCode::CONFLICT
            | StatusCode::PAYLOAD_TOO_LARGE) => Err(ClientError::Rejected(status)),
            status => Err(ClientError::UnexpectedStatus(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;

    #[derive(Clone, Default)]
    struct Server {
        pending: Arc<Mutex<Option<Value>>>,
        report_status: Arc<Mutex<u16>>,
        received: Arc<Mutex<Vec<(String, Value, String)>>>,
    }

    async fn pending(State(server): State<Server>) -> Response {
        match server.pending.lock().unwrap().take() {
            Some(job) => Json(job).into_response(),
            None => axum::http::StatusCode::NO_CONTENT.into_response(),
        }
    }

    async fn result(
        State(server): State<Server>,
        Path(id): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> axum::http::StatusCode {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        server.received.lock().unwrap().push((id, body, auth));
        axum::http::StatusCode::from_u16(*server.report_status.lock().unwrap()).unwrap()
    }

    async fn spawn(server: Server) -> String {
        let app = Router::new()
            .route("/api/v1/builds/pending", get(pending))
            .route("/api/v1/builds/{id}/result", post(result))
            .with_state(server);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn claim_decodes_a_job_then_sees_an_empty_queue() {
        let server = Server::default();
        *server.pending.lock().unwrap() = Some(json!({
            "id": "42",
            "project_slug": "handbook",
            "version": "v1.0.0",
            "source_url": "https://git.example.com/handbook.git",
            "ref": "",
            "docker_image": "docs:1"
        }));
        let client = QueueClient::new(&spawn(server).await, "secret").unwrap();

        let job = client.claim().await.unwrap().unwrap();
        assert_eq!(job.id, "42");
        assert_eq!(job.version, "v1.0.0");
        assert_eq!(job.source_ref, "");

        assert_eq!(client.claim().await.unwrap(), None);
    }

    #[tokio::test]
    async fn report_sends_bearer_token_and_wire_fields() {
        let server = Server::default();
        *server.report_status.lock().unwrap() = 200;
        let client = QueueClient::new(&spawn(server.clone()).await, "secret").unwrap();

        let report = BuildReport::success("ok".into(), "main".into(), Duration::from_millis(1500));
        client.report("7", &report).await.unwrap();

        let received = server.received.lock().unwrap().clone();
        assert_eq!(received.len(), 1);
        let (id, body, auth) = &received[0];
        assert_eq!(id, "7");
        assert_eq!(auth, "Bearer secret");
        assert_eq!(
            body,
            &json!({ "status": "success", "logs": "ok", "ref": "main", "duration_ms": 1500 })
        );
    }

    #[tokio::test]
    async fn late_report_is_rejected_and_server_errors_are_not() {
        let server = Server::default();
        let client = QueueClient::new(&spawn(server.clone()).await, "secret").unwrap();
        let report = BuildReport::failed("boom".into(), String::new(), String::new(), Duration::ZERO);

        *server.report_status.lock().unwrap() = 409;
        let err = client.report("7", &report).await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected(StatusCode::CONFLICT)));

        *server.report_status.lock().unwrap() = 503;
        let err = client.report("7", &report).await.unwrap_err();
        assert!(matches!(err, ClientError::UnexpectedStatus(_)));
    }

    #[test]
    fn failed_report_omits_empty_fields() {
        let report = BuildReport::failed("fetch: boom".into(), String::new(), String::new(), Duration::ZERO);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(
            value,
            json!({ "status": "failed", "error": "fetch: boom", "duration_ms": 0 })
        );
    }

    #[test]
    fn long_logs_keep_their_tail() {
        assert_eq!(log_tail("short".into(), 16), "short");
        assert_eq!(
            log_tail("line 1\nline 2\n".into(), 7),
            "[... 7 bytes truncated ...]\nline 2\n"
        );
        // Never splits a multi-byte character.
        assert_eq!(log_tail("ééé".into(), 3), "[... 4 bytes truncated ...]\né");
    }

    #[test]
    fn reports_cap_log_size() {
        let logs = "x".repeat(MAX_REPORT_LOG_BYTES) + "last line\n";
        let report = BuildReport::failed("execute: boom".into(), logs, String::new(), Duration::ZERO);
        let kept = report.logs.unwrap();
        assert!(kept.starts_with("[... 10 bytes truncated ...]\n"));
        assert!(kept.ends_with("last line\n"));
        assert!(kept.len() < MAX_REPORT_LOG_BYTES + 64);
    }
}
