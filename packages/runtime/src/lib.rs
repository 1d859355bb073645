// ABOUTME: Container runtime boundary consumed by the lifecycle manager and terminal broker
// ABOUTME: Exposes exactly the operations the control plane needs, behind one trait

mod docker;
mod error;
pub mod fake;
mod retry;
mod types;

use async_trait::async_trait;

pub use docker::DockerRuntime;
pub use error::RuntimeError;
pub use retry::{wait_until_running, RetryPolicy};
pub use types::{
    ContainerSpec, ContainerState, ContainerStatus, ExecOptions, ExecOutput, ExecStream,
    PortMapping, VolumeMount,
};

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// The container runtime contract the rest of the control plane depends on.
/// Lifecycle and broker logic only ever see this trait, so a deterministic
/// fake can stand in for Docker in tests.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container from the spec, returning an opaque reference.
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a created or stopped container. Already-started is success.
    async fn start(&self, container_ref: &str) -> Result<()>;

    /// Stop a running container. Already-stopped and not-found are success.
    async fn stop(&self, container_ref: &str) -> Result<()>;

    /// Remove a container. Not-found is success.
    async fn remove(&self, container_ref: &str, force: bool) -> Result<()>;

    /// Inspect the container's current state.
    async fn inspect(&self, container_ref: &str) -> Result<ContainerState>;

    /// Open an interactive exec attached to a duplex stream.
    async fn exec(
        &self,
        container_ref: &str,
        cmd: Vec<String>,
        opts: ExecOptions,
    ) -> Result<ExecStream>;

    /// Run a command to completion and collect its combined output.
    async fn exec_collect(&self, container_ref: &str, cmd: Vec<String>) -> Result<ExecOutput>;

    /// Resize the pseudo-terminal of a live exec.
    async fn resize_exec(&self, exec_id: &str, cols: u16, rows: u16) -> Result<()>;

    /// Bounded tail of the container's combined stdout/stderr.
    async fn logs(&self, container_ref: &str, tail: usize) -> Result<String>;
}
