// ABOUTME: Docker implementation of the ContainerRuntime trait via bollard
// ABOUTME: Tolerates already-stopped/not-found where the contract asks for it

use std::collections::HashMap;

use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecResults};
use bollard::Docker;
use futures_util::StreamExt;
use tracing::{debug, error, info, warn};

use crate::{
    ContainerRuntime, ContainerSpec, ContainerState, ContainerStatus, ExecOptions, ExecOutput,
    ExecStream, Result, RuntimeError,
};

/// Grace period for stop before the daemon escalates to SIGKILL.
const STOP_TIMEOUT_SECS: i64 = 10;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon and verify it responds.
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_socket_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        docker.ping().await.map_err(|e| {
            error!("Failed to connect to Docker daemon: {}", e);
            RuntimeError::Unavailable(e.to_string())
        })?;

        info!("Connected to Docker daemon");
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    fn to_bollard_config(spec: &ContainerSpec) -> Config<String> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for port in &spec.ports {
            let container_port = format!("{}/tcp", port.container_port);
            exposed_ports.insert(container_port.clone(), HashMap::new());
            port_bindings.insert(
                container_port,
                Some(vec![bollard::models::PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(port.host_port.to_string()),
                }]),
            );
        }

        let binds: Vec<String> = spec
            .binds
            .iter()
            .map(|v| {
                format!(
                    "{}:{}:{}",
                    v.host_path,
                    v.container_path,
                    if v.readonly { "ro" } else { "rw" }
                )
            })
            .collect();

        let host_config = bollard::models::HostConfig {
            binds: Some(binds),
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    fn convert_status(status: Option<bollard::models::ContainerStateStatusEnum>) -> ContainerStatus {
        use bollard::models::ContainerStateStatusEnum as S;
        match status {
            Some(S::CREATED) => ContainerStatus::Created,
            Some(S::RUNNING) => ContainerStatus::Running,
            Some(S::RESTARTING) => ContainerStatus::Restarting,
            Some(S::PAUSED) => ContainerStatus::Paused,
            Some(S::REMOVING) => ContainerStatus::Removing,
            Some(S::EXITED) => ContainerStatus::Exited,
            Some(S::DEAD) => ContainerStatus::Dead,
            _ => ContainerStatus::Unknown,
        }
    }

    fn is_not_found(err: &BollardError) -> bool {
        matches!(
            err,
            BollardError::DockerResponseServerError {
                status_code: 404,
                ..
            }
        )
    }

    fn is_not_modified(err: &BollardError) -> bool {
        matches!(
            err,
            BollardError::DockerResponseServerError {
                status_code: 304,
                ..
            }
        )
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        debug!("Creating container {} from image {}", spec.name, spec.image);

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), Self::to_bollard_config(spec))
            .await?;

        info!("Created container {} ({})", spec.name, response.id);
        Ok(response.id)
    }

    async fn start(&self, container_ref: &str) -> Result<()> {
        match self
            .docker
            .start_container(container_ref, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(_) => {
                info!("Started container {}", container_ref);
                Ok(())
            }
            Err(e) if Self::is_not_modified(&e) => {
                debug!("Container {} already started", container_ref);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn stop(&self, container_ref: &str) -> Result<()> {
        let options = StopContainerOptions {
            t: STOP_TIMEOUT_SECS,
        };
        match self.docker.stop_container(container_ref, Some(options)).await {
            Ok(_) => {
                info!("Stopped container {}", container_ref);
                Ok(())
            }
            Err(e) if Self::is_not_modified(&e) => {
                debug!("Container {} already stopped", container_ref);
                Ok(())
            }
            Err(e) if Self::is_not_found(&e) => {
                warn!("Container {} not found during stop", container_ref);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, container_ref: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };
        match self
            .docker
            .remove_container(container_ref, Some(options))
            .await
        {
            Ok(_) => {
                info!("Removed container {}", container_ref);
                Ok(())
            }
            Err(e) if Self::is_not_found(&e) => {
                debug!("Container {} already removed", container_ref);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn inspect(&self, container_ref: &str) -> Result<ContainerState> {
        let response = self
            .docker
            .inspect_container(container_ref, None)
            .await
            .map_err(|e| {
                if Self::is_not_found(&e) {
                    RuntimeError::NotFound(container_ref.to_string())
                } else {
                    e.into()
                }
            })?;

        let state = response.state.unwrap_or_default();
        Ok(ContainerState {
            status: Self::convert_status(state.status),
            exit_code: state.exit_code,
        })
    }

    async fn exec(
        &self,
        container_ref: &str,
        cmd: Vec<String>,
        opts: ExecOptions,
    ) -> Result<ExecStream> {
        let exec_config = CreateExecOptions {
            cmd: Some(cmd),
            env: if opts.env.is_empty() {
                None
            } else {
                Some(opts.env)
            },
            user: opts.user,
            working_dir: opts.working_dir,
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            attach_stdin: Some(opts.attach_stdin),
            tty: Some(opts.tty),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_ref, exec_config)
            .await
            .map_err(|e| {
                if Self::is_not_found(&e) {
                    RuntimeError::NotFound(container_ref.to_string())
                } else {
                    e.into()
                }
            })?;

        match self.docker.start_exec(&exec.id, None).await? {
            StartExecResults::Attached { output, input } => {
                let output = output
                    .map(|item| {
                        item.map(|log| log.into_bytes())
                            .map_err(RuntimeError::from)
                    })
                    .boxed();
                Ok(ExecStream {
                    exec_id: exec.id,
                    output,
                    input,
                })
            }
            StartExecResults::Detached => Err(RuntimeError::ExecDetached),
        }
    }

    async fn exec_collect(&self, container_ref: &str, cmd: Vec<String>) -> Result<ExecOutput> {
        let exec_config = CreateExecOptions {
            cmd: Some(cmd),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self.docker.create_exec(container_ref, exec_config).await?;

        let mut collected = String::new();
        match self.docker.start_exec(&exec.id, None).await? {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message })
                        | Ok(LogOutput::StdErr { message })
                        | Ok(LogOutput::Console { message }) => {
                            collected.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            StartExecResults::Detached => return Err(RuntimeError::ExecDetached),
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(0),
            output: collected,
        })
    }

    async fn resize_exec(&self, exec_id: &str, cols: u16, rows: u16) -> Result<()> {
        self.docker
            .resize_exec(
                exec_id,
                ResizeExecOptions {
                    height: rows,
                    width: cols,
                },
            )
            .await?;
        Ok(())
    }

    async fn logs(&self, container_ref: &str, tail: usize) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(container_ref, Some(options));
        let mut collected = String::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(log) => collected.push_str(&String::from_utf8_lossy(&log.into_bytes())),
                Err(e) if Self::is_not_found(&e) => {
                    return Err(RuntimeError::NotFound(container_ref.to_string()))
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(collected)
    }
}
