//! Ephemeral container backend.
//!
//! One unit per execution: materialize the source in a private workspace,
//! start a locked-down unit over it, stream its output under the output
//! ceiling, and tear everything down whatever happened.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use kiln_core::{
    Admission, BackendError, BackendOutcome, BackendRequest, FailureKind, IsolationKind,
    OutputGovernor, SandboxBackend,
};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, warn};

use crate::config::ContainerConfig;
use crate::error::ContainerError;
use crate::runtime::{UnitRuntime, UnitSpec};
use crate::workspace::{Workspace, STDIN_FILE};

/// How the output race ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Drained,
    Timeout,
    OutputLimit,
    Cancelled,
}

/// Backend running each execution in its own container
pub struct ContainerBackend<R: UnitRuntime> {
    runtime: Arc<R>,
    config: ContainerConfig,
}

impl<R: UnitRuntime> ContainerBackend<R> {
    /// Create a new container backend
    #[must_use]
    pub fn new(runtime: R, config: ContainerConfig) -> Self {
        Self {
            runtime: Arc::new(runtime),
            config,
        }
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Get the runtime
    #[must_use]
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    fn unit_spec(&self, workspace: &Workspace, image: &str, request: &BackendRequest) -> UnitSpec {
        let mount = self.config.workspace_mount.as_str();
        let stdin = if workspace.has_input() {
            format!("{}/{STDIN_FILE}", mount.trim_end_matches('/'))
        } else {
            "/dev/null".to_string()
        };
        let command = format!("exec <{stdin}; {}", request.profile.entry_command(mount));

        let mut env = vec!["HOME=/tmp".to_string()];
        env.extend(request.profile.env.iter().map(|(k, v)| format!("{k}={v}")));

        UnitSpec {
            name: format!("kiln-{}", request.execution_id),
            image: image.to_string(),
            command,
            env,
            workspace: workspace.path().to_path_buf(),
            mount_point: mount.to_string(),
            user: self.config.user.clone(),
            memory_bytes: request.memory_limit_bytes,
            nano_cpus: self.config.nano_cpus(),
            pids_limit: self.config.pids_limit,
            tmpfs_bytes: self.config.tmpfs_bytes(),
        }
    }

    async fn run_in(
        &self,
        workspace: &Workspace,
        image: &str,
        request: &BackendRequest,
    ) -> Result<BackendOutcome, BackendError> {
        if self.config.pull_images {
            self.runtime
                .ensure_image(image)
                .await
                .map_err(ContainerError::into_backend)?;
        }

        let spec = self.unit_spec(workspace, image, request);
        let unit = self
            .runtime
            .create(&spec)
            .await
            .map_err(ContainerError::into_backend)?;

        let outcome = self.drive(&unit, request).await;

        if let Err(err) = self.runtime.remove(&unit).await {
            warn!(unit = %unit, error = %err, "Failed to remove unit");
        }
        outcome
    }

    async fn drive(&self, unit: &str, request: &BackendRequest) -> Result<BackendOutcome, BackendError> {
        let mut stream = self
            .runtime
            .attach(unit)
            .await
            .map_err(ContainerError::into_backend)?;

        // Registered before start so a fast exit is not missed.
        let mut waiter: JoinHandle<Result<i64, ContainerError>> = {
            let runtime = Arc::clone(&self.runtime);
            let unit = unit.to_string();
            tokio::spawn(async move { runtime.wait(&unit).await })
        };
        if let Err(err) = self.runtime.start(unit).await {
            waiter.abort();
            return Err(err.into_backend());
        }

        let deadline = Instant::now() + request.timeout;
        let mut output = OutputGovernor::new(request.max_output_bytes);
        let mut ending = loop {
            tokio::select! {
                biased;
                () = request.cancel.cancelled() => break Ending::Cancelled,
                () = sleep_until(deadline) => break Ending::Timeout,
                next = stream.next() => match next {
                    Some(Ok(chunk)) => {
                        let before = output.len();
                        let admission = output.push(&chunk.bytes);
                        request.chunks.emit(&output.as_bytes()[before..]);
                        if admission == Admission::Exceeded {
                            break Ending::OutputLimit;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(unit = %unit, error = %err, "Output stream failed");
                        break Ending::Drained;
                    }
                    None => break Ending::Drained,
                },
            }
        };
        drop(stream);

        let mut exit_code = None;
        let mut wait_error = None;
        if ending == Ending::Drained {
            tokio::select! {
                biased;
                () = request.cancel.cancelled() => ending = Ending::Cancelled,
                joined = timeout_at(deadline, &mut waiter) => match joined {
                    Ok(Ok(Ok(code))) => exit_code = Some(code),
                    Ok(Ok(Err(err))) => wait_error = Some(err.to_string()),
                    Ok(Err(join)) => wait_error = Some(format!("wait task failed: {join}")),
                    Err(_) => ending = Ending::Timeout,
                },
            }
        }
        waiter.abort();

        let memory = request.memory_limit_bytes;
        if let Some(code) = exit_code {
            debug!(unit = %unit, exit_code = code, output_bytes = output.len(), "Unit exited");
            return Ok(BackendOutcome::completed(output.into_text(), code, memory));
        }

        if let Err(err) = self.runtime.kill(unit).await {
            warn!(unit = %unit, error = %err, "Failed to kill unit");
        }
        let text = output.into_text();
        let outcome = match (ending, wait_error) {
            (Ending::Drained, Some(message)) => {
                warn!(unit = %unit, error = %message, "Exit status unavailable");
                BackendOutcome::failed(
                    FailureKind::RuntimeError,
                    format!("exit status unavailable: {message}"),
                    text,
                )
            }
            (Ending::Timeout, _) => BackendOutcome::failed(
                FailureKind::Timeout,
                format!("execution timed out after {} ms", request.timeout.as_millis()),
                text,
            ),
            (Ending::OutputLimit, _) => BackendOutcome::failed(
                FailureKind::OutputLimitExceeded,
                format!("output limit of {} bytes exceeded", request.max_output_bytes),
                text,
            ),
            (Ending::Cancelled | Ending::Drained, _) => {
                BackendOutcome::failed(FailureKind::Cancelled, "execution cancelled", text)
            }
        };
        Ok(outcome.with_memory(memory))
    }
}

#[async_trait]
impl<R: UnitRuntime> SandboxBackend for ContainerBackend<R> {
    fn name(&self) -> &'static str {
        self.runtime.name()
    }

    fn isolation(&self) -> IsolationKind {
        IsolationKind::Container
    }

    async fn execute(&self, request: BackendRequest) -> Result<BackendOutcome, BackendError> {
        let image = request.profile.image().ok_or_else(|| {
            BackendError::internal(format!(
                "{} does not run in a container",
                request.profile.language
            ))
        })?;
        if request.cancel.is_cancelled() {
            return Ok(BackendOutcome::failed(
                FailureKind::Cancelled,
                "execution cancelled",
                String::new(),
            ));
        }

        let workspace = Workspace::materialize(request.profile, request.code(), request.input())
            .await
            .map_err(ContainerError::into_backend)?;

        let outcome = self.run_in(&workspace, image, &request).await;

        if let Err(err) = workspace.close() {
            warn!(execution_id = %request.execution_id, error = %err, "Failed to remove workspace");
        }
        outcome
    }
}
