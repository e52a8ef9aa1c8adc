//! Isolated execution of a project's build image.
//!
//! [`SandboxRuntime`] is the container capability; [`Sandbox`] drives it
//! through one build run under a hard wall-clock deadline.

pub mod docker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};

/// Where the fetched sources appear inside the container (read-only).
pub const SOURCE_MOUNT: &str = "/repo";
/// Where the build must write its artifacts (read-write).
pub const OUTPUT_MOUNT: &str = "/output";

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("container exceeded timeout of {0:?}")]
    Timeout(Duration),
    #[error("container exited with code {0}")]
    NonZeroExit(i64),
    #[error("container {op}: {message}")]
    Runtime { op: &'static str, message: String },
}

impl SandboxError {
    pub fn runtime(op: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Runtime {
            op,
            message: err.to_string(),
        }
    }
}

/// One container to run: the image plus the two host directories it mounts.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    /// Container name, unique per job. Lets an abandoned create be cleaned
    /// up before its id is known.
    pub name: String,
    pub image: String,
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// Low-level container operations. Implementations must be safe to call
/// `kill` and `remove` on a container that already stopped.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Create (not start) a container named `spec.name`, pulling the image
    /// when absent.
    async fn create(&self, spec: &SandboxSpec) -> Result<String, SandboxError>;
    async fn start(&self, id: &str) -> Result<(), SandboxError>;
    /// Block until the container is no longer running; returns its exit code.
    async fn wait(&self, id: &str) -> Result<i64, SandboxError>;
    async fn kill(&self, id: &str) -> Result<(), SandboxError>;
    async fn remove(&self, id: &str) -> Result<(), SandboxError>;
    /// Append combined stdout/stderr to `sink`. On error, whatever was read
    /// before the failure stays in `sink`.
    async fn logs(&self, id: &str, sink: &mut Vec<u8>) -> Result<(), SandboxError>;
}

/// Outcome of one sandboxed run. Logs are kept whatever the result.
#[derive(Debug)]
pub struct SandboxRun {
    pub logs: String,
    pub result: Result<(), SandboxError>,
}

impl SandboxRun {
    fn failed(err: SandboxError) -> Self {
        Self {
            logs: String::new(),
            result: Err(err),
        }
    }
}

#[derive(Clone)]
pub struct Sandbox {
    runtime: Arc<dyn SandboxRuntime>,
    timeout: Duration,
}

impl Sandbox {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, timeout: Duration) -> Self {
        Self { runtime, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `spec` to completion or until the deadline passes.
    ///
    /// One deadline covers image pull, create, start and wait. Once created,
    /// the container is always removed; a create cut short by the deadline
    /// is removed by name.
    pub async fn run(&self, spec: &SandboxSpec) -> SandboxRun {
        let deadline = Instant::now() + self.timeout;

        let id = match timeout_at(deadline, self.runtime.create(spec)).await {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => return SandboxRun::failed(e),
            Err(_) => {
                tracing::warn!(
                    container = %spec.name,
                    image = %spec.image,
                    timeout_secs = self.timeout.as_secs(),
                    "Container not created before the deadline"
                );
                // Usually nothing to remove; the daemon may have finished the
                // create after the request was dropped.
                if let Err(e) = self.runtime.remove(&spec.name).await {
                    tracing::debug!(container = %spec.name, error = %e, "No container to remove");
                }
                return SandboxRun::failed(SandboxError::Timeout(self.timeout));
            }
        };
        tracing::debug!(container = %id, name = %spec.name, image = %spec.image, "Container created");

        let result = self.start_and_wait(&id, deadline).await;

        if let Err(SandboxError::Timeout(_)) = &result {
            tracing::warn!(container = %id, timeout_secs = self.timeout.as_secs(), "Container timed out, killing");
            if let Err(e) = self.runtime.kill(&id).await {
                tracing::warn!(container = %id, error = %e, "Failed to kill container");
            }
        }

        let mut raw = Vec::new();
        if let Err(e) = self.runtime.logs(&id, &mut raw).await {
            tracing::warn!(container = %id, error = %e, bytes = raw.len(), "Log read ended early");
        }

        if let Err(e) = self.runtime.remove(&id).await {
            tracing::warn!(container = %id, error = %e, "Failed to remove container");
        }

        SandboxRun {
            logs: String::from_utf8_lossy(&raw).into_owned(),
            result,
        }
    }

    async fn start_and_wait(&self, id: &str, deadline: Instant) -> Result<(), SandboxError> {
        let run = async {
            self.runtime.start(id).await?;
            self.runtime.wait(id).await
        };
        match timeout_at(deadline, run).await {
            Err(_) => Err(SandboxError::Timeout(self.timeout)),
            Ok(Err(e)) => Err(e),
            Ok(Ok(0)) => Ok(()),
            Ok(Ok(code)) => Err(SandboxError::NonZeroExit(code)),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable in-process runtime shared by sandbox and pipeline tests.

    use std::sync::Mutex;

    use super::*;

    pub type OnStart = Box<dyn Fn(&SandboxSpec) + Send + Sync>;

    pub struct FakeRuntime {
        pub exit_code: i64,
        /// Never return from `wait`.
        pub hang: bool,
        pub fail_create: bool,
        /// Time `create` spends before returning, e.g. pulling an image.
        pub create_delay: Duration,
        /// Never return from `create`.
        pub hang_create: bool,
        pub log_output: Vec<u8>,
        /// Fail the log read after `log_output` has been delivered.
        pub log_error: bool,
        /// Side effect run on `start`, e.g. writing artifacts.
        pub on_start: Option<OnStart>,
        pub calls: Mutex<Vec<String>>,
        /// Ids or names passed to `remove`.
        pub removed: Mutex<Vec<String>>,
        pub spec: Mutex<Option<SandboxSpec>>,
    }

    impl Default for FakeRuntime {
        fn default() -> Self {
            Self {
                exit_code: 0,
                hang: false,
                fail_create: false,
                create_delay: Duration::ZERO,
                hang_create: false,
                log_output: b"building docs\n".to_vec(),
                log_error: false,
                on_start: None,
                calls: Mutex::new(Vec::new()),
                removed: Mutex::new(Vec::new()),
                spec: Mutex::new(None),
            }
        }
    }

    impl FakeRuntime {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn removed(&self) -> Vec<String> {
            self.removed.lock().unwrap().clone()
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
    }

    #[async_trait]
    impl SandboxRuntime for FakeRuntime {
        async fn create(&self, spec: &SandboxSpec) -> Result<String, SandboxError> {
            self.record("create");
            if self.hang_create {
                std::future::pending::<()>().await;
            }
            if !self.create_delay.is_zero() {
                tokio::time::sleep(self.create_delay).await;
            }
            if self.fail_create {
                return Err(SandboxError::runtime("create", "no such image"));
            }
            *self.spec.lock().unwrap() = Some(spec.clone());
            Ok("fake-1".into())
        }

        async fn start(&self, _id: &str) -> Result<(), SandboxError> {
            self.record("start");
            let spec = self.spec.lock().unwrap().clone();
            if let (Some(hook), Some(spec)) = (&self.on_start, spec) {
                hook(&spec);
            }
            Ok(())
        }

        async fn wait(&self, _id: &str) -> Result<i64, SandboxError> {
            self.record("wait");
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(self.exit_code)
        }

        async fn kill(&self, _id: &str) -> Result<(), SandboxError> {
            self.record("kill");
            Ok(())
        }

        async fn remove(&self, id: &str) -> Result<(), SandboxError> {
            self.record("remove");
            self.removed.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn logs(&self, _id: &str, sink: &mut Vec<u8>) -> Result<(), SandboxError> {
            self.record("logs");
            sink.extend_from_slice(&self.log_output);
            if self.log_error {
                return Err(SandboxError::runtime("logs", "connection reset"));
            }
            Ok(())
        }
    }
}
