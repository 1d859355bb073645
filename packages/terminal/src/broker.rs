// ABOUTME: Session broker implementation and in-memory session table
// ABOUTME: Opens PTY execs, pumps output to client channels, owns all teardown

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use roost_registry::InstanceRegistry;
use roost_runtime::{wait_until_running, ContainerRuntime, ExecOptions, RetryPolicy, RuntimeError};

use crate::{BrokerError, Result};

/// Events delivered to the client-held channel of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Raw bytes from the container's combined output stream.
    Data(Bytes),
    /// The remote shell exited or the session was force-closed.
    Exit,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Canonical container names are `{container_prefix}-{subdomain}`.
    pub container_prefix: String,
    /// Unprivileged in-container user the shell runs as.
    pub shell_user: String,
    /// Log tail length embedded in terminal-open failures.
    pub log_tail: usize,
    pub ready_policy: RetryPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            container_prefix: "roost".to_string(),
            shell_user: "agent".to_string(),
            log_tail: 50,
            ready_policy: RetryPolicy::terminal_ready(),
        }
    }
}

struct SessionEntry {
    instance_id: String,
    exec_id: String,
    input: Arc<Mutex<Pin<Box<dyn AsyncWrite + Send>>>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    reader: JoinHandle<()>,
}

type SessionTable = Arc<RwLock<HashMap<String, SessionEntry>>>;

/// Broker for interactive terminal sessions. Constructed once per process
/// and passed by reference; never a global, so tests can substitute fakes.
pub struct SessionBroker {
    registry: Arc<InstanceRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    config: BrokerConfig,
    sessions: SessionTable,
}

impl SessionBroker {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        config: BrokerConfig,
    ) -> Self {
        Self {
            registry,
            runtime,
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Open an interactive shell inside the instance's container and wire it
    /// to `events`. Returns the new session id.
    pub async fn create_session(
        &self,
        instance_id: &str,
        caller_id: &str,
        caller_is_admin: bool,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<String> {
        let instance = self
            .registry
            .find_by_id(instance_id)
            .await?
            .ok_or_else(|| BrokerError::NotFound(instance_id.to_string()))?;

        if instance.owner_id != caller_id && !caller_is_admin {
            return Err(BrokerError::NotAuthorized(instance_id.to_string()));
        }

        let container_ref = self.resolve_container_ref(&instance).await?;
        self.await_ready(&container_ref).await?;

        let opts = ExecOptions {
            user: Some(self.config.shell_user.clone()),
            env: vec![
                "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
                "LANG=C.UTF-8".to_string(),
                "TERM=xterm-256color".to_string(),
                format!("HOME=/home/{}", self.config.shell_user),
            ],
            working_dir: Some(format!("/home/{}", self.config.shell_user)),
            tty: true,
            attach_stdin: true,
        };
        let stream = self
            .runtime
            .exec(
                &container_ref,
                vec!["/bin/bash".to_string(), "-l".to_string()],
                opts,
            )
            .await?;

        let session_id = Uuid::new_v4().to_string();

        // Hold the write lock across spawn + insert: the reader removes its
        // own entry on stream end, which cannot happen before the insert.
        let mut table = self.sessions.write().await;
        let reader = Self::spawn_reader(
            self.sessions.clone(),
            session_id.clone(),
            stream.output,
            events.clone(),
        );
        table.insert(
            session_id.clone(),
            SessionEntry {
                instance_id: instance.id.clone(),
                exec_id: stream.exec_id,
                input: Arc::new(Mutex::new(stream.input)),
                events,
                reader,
            },
        );
        drop(table);

        info!(
            "Opened terminal session {} on instance {} (container {})",
            session_id, instance.id, container_ref
        );
        Ok(session_id)
    }

    fn spawn_reader(
        sessions: SessionTable,
        session_id: String,
        mut output: futures_util::stream::BoxStream<'static, std::result::Result<Bytes, RuntimeError>>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(item) = output.next().await {
                match item {
                    Ok(data) => {
                        if events.send(SessionEvent::Data(data)).is_err() {
                            // Client channel gone; the ws side will call
                            // destroy_session, nothing more to pump.
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Terminal session {} stream error: {}", session_id, e);
                        break;
                    }
                }
            }
            // Remote side ended the session: notify and drop the entry.
            let _ = events.send(SessionEvent::Exit);
            if sessions.write().await.remove(&session_id).is_some() {
                debug!("Terminal session {} ended by remote exit", session_id);
            }
        })
    }

    /// Normalize a historical container reference against the canonical
    /// `{prefix}-{subdomain}` name, persisting the correction once detected.
    async fn resolve_container_ref(&self, instance: &roost_registry::Instance) -> Result<String> {
        let stored = instance
            .container_ref
            .clone()
            .ok_or_else(|| BrokerError::NoContainer(instance.id.clone()))?;

        let canonical = format!("{}-{}", self.config.container_prefix, instance.subdomain);
        if stored != canonical && self.runtime.inspect(&canonical).await.is_ok() {
            info!(
                "Correcting container ref for instance {}: {} -> {}",
                instance.id, stored, canonical
            );
            self.registry
                .update_container_ref(&instance.id, &canonical)
                .await?;
            return Ok(canonical);
        }
        Ok(stored)
    }

    /// Poll until the container is running, embedding the recent log tail in
    /// the error when the budget exhausts.
    async fn await_ready(&self, container_ref: &str) -> Result<()> {
        match wait_until_running(self.runtime.as_ref(), container_ref, self.config.ready_policy)
            .await
        {
            Ok(()) => Ok(()),
            Err(RuntimeError::NotRunning {
                container_ref,
                attempts,
                last_status,
            }) => {
                let logs = self
                    .runtime
                    .logs(&container_ref, self.config.log_tail)
                    .await
                    .unwrap_or_default();
                Err(BrokerError::ContainerNotReady {
                    container_ref,
                    reason: format!(
                        "still {} after {} attempts",
                        last_status, attempts
                    ),
                    logs,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write client input into the container stream.
    pub async fn write_input(&self, session_id: &str, data: &[u8]) -> Result<()> {
        let input = {
            let sessions = self.sessions.read().await;
            let entry = sessions
                .get(session_id)
                .ok_or_else(|| BrokerError::SessionNotFound(session_id.to_string()))?;
            entry.input.clone()
        };

        let mut input = input.lock().await;
        if let Err(e) = async {
            input.write_all(data).await?;
            input.flush().await
        }
        .await
        {
            warn!("Terminal session {} input write failed: {}", session_id, e);
            drop(input);
            self.destroy_session(session_id).await;
            return Err(BrokerError::Stream(e.to_string()));
        }
        Ok(())
    }

    /// Resize the session's pseudo-terminal. Failures are non-fatal.
    pub async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<()> {
        let exec_id = {
            let sessions = self.sessions.read().await;
            let entry = sessions
                .get(session_id)
                .ok_or_else(|| BrokerError::SessionNotFound(session_id.to_string()))?;
            entry.exec_id.clone()
        };

        if let Err(e) = self.runtime.resize_exec(&exec_id, cols, rows).await {
            warn!(
                "Ignoring resize failure for session {} ({}x{}): {}",
                session_id, cols, rows, e
            );
        }
        Ok(())
    }

    /// Tear a session down. Idempotent no-op when the id is unknown.
    pub async fn destroy_session(&self, session_id: &str) {
        if let Some(entry) = self.sessions.write().await.remove(session_id) {
            entry.reader.abort();
            debug!("Destroyed terminal session {}", session_id);
        }
    }

    /// Force-close every session of an instance, notifying each channel of
    /// the exit. Used by instance stop/delete/rebuild.
    pub async fn destroy_instance_sessions(&self, instance_id: &str) {
        let mut sessions = self.sessions.write().await;
        let ids: Vec<String> = sessions
            .iter()
            .filter(|(_, entry)| entry.instance_id == instance_id)
            .map(|(id, _)| id.clone())
            .collect();

        for id in ids {
            if let Some(entry) = sessions.remove(&id) {
                let _ = entry.events.send(SessionEvent::Exit);
                entry.reader.abort();
                info!(
                    "Force-closed terminal session {} (instance {})",
                    id, instance_id
                );
            }
        }
    }

    pub async fn active_session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
