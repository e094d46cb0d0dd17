//! Docker Engine implementation of [`UnitRuntime`].
//!
//! Output comes from `attach`, whose frames carry an 8-byte header
//! (`[stream, 0, 0, 0, len_be32]`); bollard's decoder strips it and yields
//! typed [`LogOutput`] frames, which are mapped onto [`OutputChunk`]s.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    KillContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::debug;

use crate::error::ContainerError;
use crate::runtime::{OutputChunk, OutputStream, UnitRuntime, UnitSpec};

/// Wait condition for units.
///
/// The waiter is registered before the unit starts; `not-running` would
/// answer at once with a zero status for a unit that is only created.
pub const WAIT_CONDITION: &str = "next-exit";

impl From<DockerError> for ContainerError {
    fn from(err: DockerError) -> Self {
        match err {
            DockerError::DockerResponseServerError {
                status_code: 404,
                message,
            } => Self::NotFound(message),
            DockerError::IOError { .. }
            | DockerError::SocketNotFoundError(_)
            | DockerError::RequestTimeoutError => Self::Unavailable(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Whether the daemon answered that the unit is already gone or stopping
fn is_gone(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404 | 409,
            ..
        }
    )
}

/// Runtime backed by the local Docker daemon
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the platform defaults (`DOCKER_HOST` or the local socket)
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Unavailable`] if no client can be built
    pub fn connect() -> Result<Self, ContainerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ContainerError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Wrap an existing client
    #[must_use]
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Check the daemon answers
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Unavailable`] if it does not
    pub async fn ping(&self) -> Result<(), ContainerError> {
        self.docker
            .ping()
            .await
            .map_err(|e| ContainerError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl UnitRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ensure_image(&self, image: &str) -> Result<(), ContainerError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(err) => return Err(err.into()),
        }

        debug!(image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut pull = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = pull.next().await {
            progress.map_err(|e| ContainerError::ImageUnavailable {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    async fn create(&self, spec: &UnitSpec) -> Result<String, ContainerError> {
        let memory = i64::try_from(spec.memory_bytes).unwrap_or(i64::MAX);
        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}:ro",
                spec.workspace.display(),
                spec.mount_point
            )]),
            tmpfs: Some(HashMap::from([(
                "/tmp".to_string(),
                format!("rw,exec,nosuid,size={}", spec.tmpfs_bytes),
            )])),
            memory: Some(memory),
            memory_swap: Some(memory),
            nano_cpus: Some(spec.nano_cpus),
            pids_limit: Some(spec.pids_limit),
            network_mode: Some("none".to_string()),
            readonly_rootfs: Some(true),
            auto_remove: Some(true),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            cap_drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        };
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                spec.command.clone(),
            ]),
            env: Some(spec.env.clone()),
            user: Some(spec.user.clone()),
            working_dir: Some(spec.mount_point.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            network_disabled: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self.docker.create_container(Some(options), config).await?;
        debug!(unit = %response.id, name = %spec.name, image = %spec.image, "Unit created");
        Ok(response.id)
    }

    async fn attach(&self, unit: &str) -> Result<OutputStream, ContainerError> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(false),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            detach_keys: None,
        };
        let AttachContainerResults { output, .. } =
            self.docker.attach_container(unit, Some(options)).await?;

        let stream = output.filter_map(|frame| async move {
            match frame {
                Ok(LogOutput::StdOut { message } | LogOutput::Console { message }) => {
                    Some(Ok(OutputChunk::stdout(message)))
                }
                Ok(LogOutput::StdErr { message }) => Some(Ok(OutputChunk::stderr(message))),
                Ok(LogOutput::StdIn { .. }) => None,
                Err(err) => Some(Err(ContainerError::from(err))),
            }
        });
        Ok(stream.boxed())
    }

    async fn start(&self, unit: &str) -> Result<(), ContainerError> {
        self.docker
            .start_container(unit, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn wait(&self, unit: &str) -> Result<i64, ContainerError> {
        let options = WaitContainerOptions {
            condition: WAIT_CONDITION,
        };
        let mut wait = self.docker.wait_container(unit, Some(options));
        match wait.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits surface as an error carrying the code.
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(err)) => Err(err.into()),
            None => Err(ContainerError::Runtime(format!(
                "wait on {unit} ended without a status"
            ))),
        }
    }

    async fn kill(&self, unit: &str) -> Result<(), ContainerError> {
        let options = KillContainerOptions { signal: "SIGKILL" };
        match self.docker.kill_container(unit, Some(options)).await {
            Err(err) if !is_gone(&err) => Err(err.into()),
            _ => Ok(()),
        }
    }

    async fn remove(&self, unit: &str) -> Result<(), ContainerError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(unit, Some(options)).await {
            Err(err) if !is_gone(&err) => Err(err.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let err = ContainerError::from(DockerError::DockerResponseServerError {
            status_code: 404,
            message: "no such container".to_string(),
        });
        assert!(matches!(err, ContainerError::NotFound(_)));

        let err = ContainerError::from(DockerError::SocketNotFoundError(
            "/var/run/docker.sock".to_string(),
        ));
        assert!(err.is_environment());

        let gone = DockerError::DockerResponseServerError {
            status_code: 409,
            message: "removal already in progress".to_string(),
        };
        assert!(is_gone(&gone));
    }

    #[test]
    fn test_wait_targets_next_exit() {
        assert_eq!(WAIT_CONDITION, "next-exit");
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon"]
    async fn test_ping_local_daemon() {
        let runtime = DockerRuntime::connect().unwrap();
        runtime.ping().await.unwrap();
    }
}
