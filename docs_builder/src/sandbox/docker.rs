//! Docker backend for the sandbox, via bollard.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::StreamExt;

use super::{SandboxError, SandboxRuntime, SandboxSpec, OUTPUT_MOUNT, SOURCE_MOUNT};

#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform's default socket.
    pub fn connect() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::runtime("connect", e))?;
        tracing::info!("Docker runtime initialized");
        Ok(Self { docker })
    }

    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        tracing::info!(image, "Pulling build image");
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| SandboxError::runtime("pull", format!("{image}: {e}")))?;
        }
        Ok(())
    }
}

fn binds(spec: &SandboxSpec) -> Vec<String> {
    vec![
        format!("{}:{SOURCE_MOUNT}:ro", spec.source_dir.display()),
        format!("{}:{OUTPUT_MOUNT}:rw", spec.output_dir.display()),
    ]
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    async fn create(&self, spec: &SandboxSpec) -> Result<String, SandboxError> {
        self.ensure_image(&spec.image).await?;

        let config = Config {
            image: Some(spec.image.clone()),
            host_config: Some(HostConfig {
                binds: Some(binds(spec)),
                ..Default::default()
            }),
            ..Default::default()
        };
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| SandboxError::runtime("create", e))?;
        Ok(created.id)
    }

    async fn start(&self, id: &str) -> Result<(), SandboxError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::runtime("start", e))
    }

    async fn wait(&self, id: &str) -> Result<i64, SandboxError> {
        let mut stream = self.docker.wait_container(
            id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );
        match stream.next().await {
            Some(Ok(status)) => Ok(status.status_code),
            // bollard surfaces a non-zero exit as an error carrying the code.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(SandboxError::runtime("wait", e)),
            None => Err(SandboxError::runtime("wait", "stream closed without a status")),
        }
    }

    async fn kill(&self, id: &str) -> Result<(), SandboxError> {
        self.docker
            .kill_container(id, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await
            .map_err(|e| SandboxError::runtime("kill", e))
    }

    async fn remove(&self, id: &str) -> Result<(), SandboxError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| SandboxError::runtime("remove", e))
    }

    async fn logs(&self, id: &str, sink: &mut Vec<u8>) -> Result<(), SandboxError> {
        let mut stream = self.docker.logs(
            id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: false,
                tail: "all".to_string(),
                ..Default::default()
            }),
        );
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| SandboxError::runtime("logs", e))?;
            sink.extend_from_slice(&chunk.into_bytes());
        }
        Ok(())
    }
}
