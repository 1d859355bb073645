// ABOUTME: Runtime-facing value types shared by the Docker implementation and the fake
// ABOUTME: Container spec, inspection state, and exec plumbing

use std::collections::HashMap;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use tokio::io::AsyncWrite;

use crate::RuntimeError;

/// Everything needed to construct an instance's container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub binds: Vec<VolumeMount>,
    pub ports: Vec<PortMapping>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
    pub readonly: bool,
}

#[derive(Debug, Clone)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

/// Observed container state, as reported by inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub status: ContainerStatus,
    pub exit_code: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    /// A crash loop signal, surfaced separately from "not yet started".
    Restarting,
    Paused,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Removing => "removing",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Dead => "dead",
            ContainerStatus::Unknown => "unknown",
        }
    }
}

/// Options for an interactive exec.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// In-container user to run as (unprivileged for terminals).
    pub user: Option<String>,
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    pub tty: bool,
    pub attach_stdin: bool,
}

/// Collected output of a run-to-completion exec.
#[derive(Debug)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub output: String,
}

/// A live interactive exec: combined output stream plus a stdin writer.
/// Dropping both halves releases the underlying exec channel.
pub struct ExecStream {
    pub exec_id: String,
    pub output: BoxStream<'static, Result<Bytes, RuntimeError>>,
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}
