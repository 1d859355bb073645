// ABOUTME: Deterministic in-memory ContainerRuntime for tests
// ABOUTME: Scriptable failures plus an echoing exec stream, no Docker required

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{
    ContainerRuntime, ContainerSpec, ContainerState, ContainerStatus, ExecOptions, ExecOutput,
    ExecStream, Result, RuntimeError,
};

/// An exec call observed by the fake, for assertions.
#[derive(Debug, Clone)]
pub struct RecordedExec {
    pub container_ref: String,
    pub cmd: Vec<String>,
    pub opts: ExecOptions,
    pub interactive: bool,
}

struct FakeContainer {
    spec: ContainerSpec,
    status: ContainerStatus,
    logs: String,
    echo_tasks: Vec<tokio::task::JoinHandle<()>>,
}

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    fail_next: HashMap<String, String>,
    execs: Vec<RecordedExec>,
    resizes: Vec<(String, u16, u16)>,
    exec_seq: u64,
}

/// In-memory runtime whose interactive execs echo input back as output.
/// Container refs are the spec names, so canonical-name normalization
/// behaves the same as with named Docker containers.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` ("create", "start", "stop", "remove",
    /// "exec", "exec_collect", "resize_exec") fail with `message`.
    pub fn fail_next(&self, op: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_next
            .insert(op.to_string(), message.to_string());
    }

    pub fn set_status(&self, container_ref: &str, status: ContainerStatus) {
        if let Some(c) = self
            .state
            .lock()
            .unwrap()
            .containers
            .get_mut(container_ref)
        {
            c.status = status;
        }
    }

    pub fn set_logs(&self, container_ref: &str, logs: &str) {
        if let Some(c) = self
            .state
            .lock()
            .unwrap()
            .containers
            .get_mut(container_ref)
        {
            c.logs = logs.to_string();
        }
    }

    pub fn has_container(&self, container_ref: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .containers
            .contains_key(container_ref)
    }

    pub fn container_spec(&self, container_ref: &str) -> Option<ContainerSpec> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(container_ref)
            .map(|c| c.spec.clone())
    }

    pub fn container_status(&self, container_ref: &str) -> Option<ContainerStatus> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(container_ref)
            .map(|c| c.status)
    }

    pub fn exec_history(&self) -> Vec<RecordedExec> {
        self.state.lock().unwrap().execs.clone()
    }

    pub fn resize_history(&self) -> Vec<(String, u16, u16)> {
        self.state.lock().unwrap().resizes.clone()
    }

    fn take_failure(&self, op: &str) -> Option<String> {
        self.state.lock().unwrap().fail_next.remove(op)
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        if let Some(msg) = self.take_failure("create") {
            return Err(RuntimeError::Failed(msg));
        }
        let mut state = self.state.lock().unwrap();
        if state.containers.contains_key(&spec.name) {
            return Err(RuntimeError::Failed(format!(
                "Container name already in use: {}",
                spec.name
            )));
        }
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                spec: spec.clone(),
                status: ContainerStatus::Created,
                logs: String::new(),
                echo_tasks: Vec::new(),
            },
        );
        Ok(spec.name.clone())
    }

    async fn start(&self, container_ref: &str) -> Result<()> {
        if let Some(msg) = self.take_failure("start") {
            return Err(RuntimeError::Failed(msg));
        }
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(container_ref)
            .ok_or_else(|| RuntimeError::NotFound(container_ref.to_string()))?;
        container.status = ContainerStatus::Running;
        Ok(())
    }

    async fn stop(&self, container_ref: &str) -> Result<()> {
        if let Some(msg) = self.take_failure("stop") {
            return Err(RuntimeError::Failed(msg));
        }
        let mut state = self.state.lock().unwrap();
        if let Some(container) = state.containers.get_mut(container_ref) {
            container.status = ContainerStatus::Exited;
            for task in container.echo_tasks.drain(..) {
                task.abort();
            }
        }
        // Not-found is success, matching the Docker implementation.
        Ok(())
    }

    async fn remove(&self, container_ref: &str, _force: bool) -> Result<()> {
        if let Some(msg) = self.take_failure("remove") {
            return Err(RuntimeError::Failed(msg));
        }
        let mut state = self.state.lock().unwrap();
        if let Some(container) = state.containers.remove(container_ref) {
            for task in container.echo_tasks {
                task.abort();
            }
        }
        Ok(())
    }

    async fn inspect(&self, container_ref: &str) -> Result<ContainerState> {
        let state = self.state.lock().unwrap();
        let container = state
            .containers
            .get(container_ref)
            .ok_or_else(|| RuntimeError::NotFound(container_ref.to_string()))?;
        Ok(ContainerState {
            status: container.status,
            exit_code: match container.status {
                ContainerStatus::Exited => Some(0),
                _ => None,
            },
        })
    }

    async fn exec(
        &self,
        container_ref: &str,
        cmd: Vec<String>,
        opts: ExecOptions,
    ) -> Result<ExecStream> {
        if let Some(msg) = self.take_failure("exec") {
            return Err(RuntimeError::Failed(msg));
        }
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(container_ref)
            .ok_or_else(|| RuntimeError::NotFound(container_ref.to_string()))?;
        if container.status != ContainerStatus::Running {
            return Err(RuntimeError::Failed(format!(
                "Container {} is not running",
                container_ref
            )));
        }

        let (client, server) = tokio::io::duplex(8192);
        let (mut client_read, client_write) = tokio::io::split(client);
        let (mut server_read, mut server_write) = tokio::io::split(server);

        // Echo shell: whatever the session writes comes back as output.
        let echo = tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                match server_read.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if server_write.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        container.echo_tasks.push(echo);

        state.exec_seq += 1;
        let exec_id = format!("fake-exec-{}", state.exec_seq);
        state.execs.push(RecordedExec {
            container_ref: container_ref.to_string(),
            cmd,
            opts,
            interactive: true,
        });

        let output = async_stream::stream! {
            let mut buf = [0u8; 4096];
            loop {
                match client_read.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => yield Ok(Bytes::copy_from_slice(&buf[..n])),
                    Err(e) => {
                        yield Err(RuntimeError::Failed(e.to_string()));
                        break;
                    }
                }
            }
        }
        .boxed();

        Ok(ExecStream {
            exec_id,
            output,
            input: Box::pin(client_write),
        })
    }

    async fn exec_collect(&self, container_ref: &str, cmd: Vec<String>) -> Result<ExecOutput> {
        if let Some(msg) = self.take_failure("exec_collect") {
            return Err(RuntimeError::Failed(msg));
        }
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get(container_ref)
            .ok_or_else(|| RuntimeError::NotFound(container_ref.to_string()))?;
        if container.status != ContainerStatus::Running {
            return Err(RuntimeError::Failed(format!(
                "Container {} is not running",
                container_ref
            )));
        }
        state.execs.push(RecordedExec {
            container_ref: container_ref.to_string(),
            cmd,
            opts: ExecOptions::default(),
            interactive: false,
        });
        Ok(ExecOutput {
            exit_code: 0,
            output: String::new(),
        })
    }

    async fn resize_exec(&self, exec_id: &str, cols: u16, rows: u16) -> Result<()> {
        if let Some(msg) = self.take_failure("resize_exec") {
            return Err(RuntimeError::Failed(msg));
        }
        self.state
            .lock()
            .unwrap()
            .resizes
            .push((exec_id.to_string(), cols, rows));
        Ok(())
    }

    async fn logs(&self, container_ref: &str, _tail: usize) -> Result<String> {
        let state = self.state.lock().unwrap();
        let container = state
            .containers
            .get(container_ref)
            .ok_or_else(|| RuntimeError::NotFound(container_ref.to_string()))?;
        Ok(container.logs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exec_echoes_input() {
        let runtime = FakeRuntime::new();
        let spec = ContainerSpec {
            name: "roost-test".to_string(),
            ..Default::default()
        };
        runtime.create(&spec).await.unwrap();
        runtime.start("roost-test").await.unwrap();

        let mut stream = runtime
            .exec("roost-test", vec!["/bin/bash".into()], ExecOptions::default())
            .await
            .unwrap();

        stream.input.write_all(b"echo hi\n").await.unwrap();
        stream.input.flush().await.unwrap();

        let chunk = stream.output.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"echo hi\n");
    }

    #[tokio::test]
    async fn stop_ends_exec_stream() {
        let runtime = FakeRuntime::new();
        let spec = ContainerSpec {
            name: "roost-test".to_string(),
            ..Default::default()
        };
        runtime.create(&spec).await.unwrap();
        runtime.start("roost-test").await.unwrap();

        let mut stream = runtime
            .exec("roost-test", vec!["/bin/bash".into()], ExecOptions::default())
            .await
            .unwrap();

        runtime.stop("roost-test").await.unwrap();
        assert!(stream.output.next().await.is_none());
    }

    #[tokio::test]
    async fn scripted_failures_fire_once() {
        let runtime = FakeRuntime::new();
        runtime.fail_next("create", "daemon exploded");

        let spec = ContainerSpec {
            name: "roost-test".to_string(),
            ..Default::default()
        };
        assert!(runtime.create(&spec).await.is_err());
        assert!(runtime.create(&spec).await.is_ok());
    }
}
