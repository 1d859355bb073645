// ABOUTME: LifecycleManager implementation: provisioning, state transitions, teardown
// ABOUTME: Owns all status mutations; post-start setup runs as a detached task

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use roost_registry::{Instance, InstanceRegistry, InstanceStatus, NewInstance, RegistryError};
use roost_runtime::{
    wait_until_running, ContainerRuntime, ContainerSpec, PortMapping, RetryPolicy, RuntimeError,
    VolumeMount,
};
use roost_terminal::SessionBroker;

use crate::{LifecycleError, Result};

const SUBDOMAIN_MIN_LEN: usize = 3;
const SUBDOMAIN_MAX_LEN: usize = 30;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Public apex domain; instances are reachable at `{slug}.{base_domain}`.
    pub base_domain: String,
    /// Scheme of the externally visible URL (TLS terminates upstream).
    pub external_scheme: String,
    /// Reserved alongside `www`: the label the control API itself answers on.
    pub api_subdomain: String,
    pub image: String,
    /// Parent of the per-tenant persistent directories.
    pub data_dir: PathBuf,
    /// Shared tooling mounted read-write into every container.
    pub tools_dir: PathBuf,
    pub container_prefix: String,
    pub shell_user: String,
    pub setup_policy: RetryPolicy,
    /// Log tail length attached to setup-failure diagnostics.
    pub log_tail: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            base_domain: "roost.local".to_string(),
            external_scheme: "https".to_string(),
            api_subdomain: "api".to_string(),
            image: "roost/instance:latest".to_string(),
            data_dir: PathBuf::from("/var/lib/roost/instances"),
            tools_dir: PathBuf::from("/var/lib/roost/tools"),
            container_prefix: "roost".to_string(),
            shell_user: "agent".to_string(),
            setup_policy: RetryPolicy::setup(),
            log_tail: 50,
        }
    }
}

/// Sole mutator of instance status. Holds the registry, the container
/// runtime, and the terminal broker so stop/delete/rebuild can force-close
/// live sessions before touching the container.
pub struct LifecycleManager {
    registry: Arc<InstanceRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    broker: Arc<SessionBroker>,
    config: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        broker: Arc<SessionBroker>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            registry,
            runtime,
            broker,
            config,
        }
    }

    /// Provision a new instance end to end: registry row, tenant directory,
    /// container, start. Marked `running` as soon as start returns; the
    /// remaining in-container setup continues asynchronously. Any failure
    /// before start succeeds rolls the row back.
    pub async fn create(&self, owner_id: &str, subdomain: &str) -> Result<Instance> {
        validate_subdomain(subdomain)?;
        if subdomain == "www" || subdomain == self.config.api_subdomain {
            return Err(LifecycleError::Conflict(subdomain.to_string()));
        }

        let instance = self
            .registry
            .create(NewInstance {
                owner_id: owner_id.to_string(),
                subdomain: subdomain.to_string(),
            })
            .await
            .map_err(|e| match e {
                RegistryError::SubdomainTaken(s) => LifecycleError::Conflict(s),
                other => LifecycleError::Registry(other),
            })?;

        match self.provision_and_start(&instance).await {
            Ok(container_ref) => {
                self.registry
                    .update_status(&instance.id, InstanceStatus::Running)
                    .await?;
                self.spawn_setup(instance.clone(), container_ref);
                info!(
                    "Created instance {} ({}.{}) for owner {}",
                    instance.id, instance.subdomain, self.config.base_domain, owner_id
                );
                self.refreshed(&instance.id).await
            }
            Err(e) => {
                warn!(
                    "Provisioning failed for instance {} ({}), rolling back: {}",
                    instance.id, instance.subdomain, e
                );
                self.rollback(&instance).await;
                Err(LifecycleError::Provisioning(e.to_string()))
            }
        }
    }

    /// Start an already provisioned instance. Re-runs the idempotent
    /// post-start setup in the background.
    pub async fn start(&self, instance: &Instance) -> Result<Instance> {
        let container_ref = self.require_container(instance)?;
        self.runtime.start(&container_ref).await?;
        self.registry
            .update_status(&instance.id, InstanceStatus::Running)
            .await?;
        self.spawn_setup(instance.clone(), container_ref);
        info!("Started instance {} ({})", instance.id, instance.subdomain);
        self.refreshed(&instance.id).await
    }

    /// Stop the instance's container. Terminal sessions are destroyed first
    /// so clients see a clean exit rather than a dead stream. Idempotent.
    pub async fn stop(&self, instance: &Instance) -> Result<Instance> {
        self.broker.destroy_instance_sessions(&instance.id).await;
        if let Some(container_ref) = &instance.container_ref {
            self.runtime.stop(container_ref).await?;
        }
        self.registry
            .update_status(&instance.id, InstanceStatus::Stopped)
            .await?;
        info!("Stopped instance {} ({})", instance.id, instance.subdomain);
        self.refreshed(&instance.id).await
    }

    /// Remove the instance entirely. Cleanup of the container and the tenant
    /// directory is best-effort: failures are logged, never propagated.
    pub async fn delete(&self, instance: &Instance) -> Result<()> {
        self.broker.destroy_instance_sessions(&instance.id).await;

        if let Some(container_ref) = &instance.container_ref {
            if let Err(e) = self.runtime.remove(container_ref, true).await {
                warn!(
                    "Failed to remove container {} for instance {}: {}",
                    container_ref, instance.id, e
                );
            }
        }

        self.registry.delete(&instance.id).await?;

        let home = self.tenant_dir(&instance.subdomain);
        if let Err(e) = tokio::fs::remove_dir_all(&home).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "Failed to remove tenant directory {} for instance {}: {}",
                    home.display(),
                    instance.id,
                    e
                );
            }
        }

        info!("Deleted instance {} ({})", instance.id, instance.subdomain);
        Ok(())
    }

    /// Replace the instance's container with a fresh one built from the
    /// configured image. Identity, ports and subdomain are preserved. A
    /// failed rebuild leaves the instance in `error` rather than deleting it.
    pub async fn rebuild(&self, instance: &Instance) -> Result<Instance> {
        self.broker.destroy_instance_sessions(&instance.id).await;
        self.registry
            .update_status(&instance.id, InstanceStatus::Installing)
            .await?;

        if let Some(container_ref) = &instance.container_ref {
            if let Err(e) = self.runtime.remove(container_ref, true).await {
                warn!(
                    "Failed to remove old container {} during rebuild of {}: {}",
                    container_ref, instance.id, e
                );
            }
        }

        match self.provision_and_start(instance).await {
            Ok(container_ref) => {
                self.registry
                    .update_status(&instance.id, InstanceStatus::Running)
                    .await?;
                self.spawn_setup(instance.clone(), container_ref);
                info!("Rebuilt instance {} ({})", instance.id, instance.subdomain);
                self.refreshed(&instance.id).await
            }
            Err(e) => {
                error!(
                    "Rebuild failed for instance {} ({}): {}",
                    instance.id, instance.subdomain, e
                );
                self.registry
                    .update_status(&instance.id, InstanceStatus::Error)
                    .await?;
                Err(LifecycleError::Provisioning(e.to_string()))
            }
        }
    }

    /// Bounded tail of the container's combined stdout/stderr.
    pub async fn logs(&self, instance: &Instance, tail: usize) -> Result<String> {
        let container_ref = self.require_container(instance)?;
        Ok(self.runtime.logs(&container_ref, tail).await?)
    }

    pub fn public_url(&self, subdomain: &str) -> String {
        format!(
            "{}://{}.{}",
            self.config.external_scheme, subdomain, self.config.base_domain
        )
    }

    fn tenant_dir(&self, subdomain: &str) -> PathBuf {
        self.config.data_dir.join(subdomain)
    }

    fn container_name(&self, subdomain: &str) -> String {
        format!("{}-{}", self.config.container_prefix, subdomain)
    }

    fn require_container(&self, instance: &Instance) -> Result<String> {
        instance
            .container_ref
            .clone()
            .ok_or_else(|| LifecycleError::NoContainer(instance.id.clone()))
    }

    async fn refreshed(&self, id: &str) -> Result<Instance> {
        self.registry
            .find_by_id(id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))
    }

    /// Tenant directory + container create + start. Returns the container
    /// reference on success; the caller decides what a failure rolls back.
    async fn provision_and_start(&self, instance: &Instance) -> Result<String> {
        self.provision_tenant_dir(&instance.subdomain).await?;

        let spec = self.container_spec(instance);
        let container_ref = self.runtime.create(&spec).await?;
        self.registry
            .update_container_ref(&instance.id, &container_ref)
            .await?;
        self.runtime.start(&container_ref).await?;
        Ok(container_ref)
    }

    /// The tenant home is world-writable: the host-side uid creating it does
    /// not match the in-container user, and the bind mount must be writable
    /// from both sides.
    async fn provision_tenant_dir(&self, subdomain: &str) -> Result<()> {
        let home = self.tenant_dir(subdomain);
        tokio::fs::create_dir_all(&home)
            .await
            .map_err(|e| LifecycleError::Provisioning(format!("{}: {}", home.display(), e)))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&home, std::fs::Permissions::from_mode(0o777))
                .await
                .map_err(|e| LifecycleError::Provisioning(format!("{}: {}", home.display(), e)))?;
        }
        Ok(())
    }

    fn container_spec(&self, instance: &Instance) -> ContainerSpec {
        let user = &self.config.shell_user;
        let public_url = self.public_url(&instance.subdomain);
        let internal_url = format!("http://127.0.0.1:{}", instance.gateway_port);

        let mut labels = HashMap::new();
        labels.insert("roost.managed".to_string(), "true".to_string());
        labels.insert("roost.instance_id".to_string(), instance.id.clone());
        labels.insert("roost.subdomain".to_string(), instance.subdomain.clone());

        ContainerSpec {
            name: self.container_name(&instance.subdomain),
            image: self.config.image.clone(),
            env: vec![
                format!("PUBLIC_URL={}", public_url),
                format!("INTERNAL_URL={}", internal_url),
                "GATEWAY_BIND=0.0.0.0:8080".to_string(),
                "SSH_BIND=0.0.0.0:22".to_string(),
            ],
            binds: vec![
                VolumeMount {
                    host_path: self.tenant_dir(&instance.subdomain).display().to_string(),
                    container_path: format!("/home/{}", user),
                    readonly: false,
                },
                VolumeMount {
                    host_path: self.config.tools_dir.display().to_string(),
                    container_path: "/opt/roost/tools".to_string(),
                    readonly: false,
                },
            ],
            ports: vec![
                PortMapping {
                    host_port: instance.ssh_port,
                    container_port: 22,
                },
                PortMapping {
                    host_port: instance.gateway_port,
                    container_port: 8080,
                },
            ],
            labels,
        }
    }

    /// Post-start setup: wait for the container to report running, then
    /// create the internal directories, fix ownership and write the runtime
    /// env file. Detached so the HTTP request that triggered the start
    /// returns immediately; failures are logged with the recent log tail.
    fn spawn_setup(&self, instance: Instance, container_ref: String) {
        let runtime = self.runtime.clone();
        let policy = self.config.setup_policy;
        let log_tail = self.config.log_tail;
        let user = self.config.shell_user.clone();
        let public_url = self.public_url(&instance.subdomain);
        let internal_url = format!("http://127.0.0.1:{}", instance.gateway_port);

        tokio::spawn(async move {
            if let Err(e) = wait_until_running(runtime.as_ref(), &container_ref, policy).await {
                let logs = match &e {
                    RuntimeError::NotRunning { .. } => runtime
                        .logs(&container_ref, log_tail)
                        .await
                        .unwrap_or_default(),
                    _ => String::new(),
                };
                error!(
                    "Setup aborted for instance {}: {}\nRecent container logs:\n{}",
                    instance.id, e, logs
                );
                return;
            }

            let script = format!(
                "mkdir -p /home/{user}/workspace /home/{user}/.roost && \
                 chown -R {user}:{user} /home/{user} && \
                 printf 'PUBLIC_URL=%s\\nINTERNAL_URL=%s\\n' '{public}' '{internal}' \
                 > /home/{user}/.roost/env",
                user = user,
                public = public_url,
                internal = internal_url,
            );
            match runtime
                .exec_collect(
                    &container_ref,
                    vec!["/bin/sh".to_string(), "-c".to_string(), script],
                )
                .await
            {
                Ok(out) if out.exit_code == 0 => {
                    info!("Setup complete for instance {}", instance.id);
                }
                Ok(out) => {
                    warn!(
                        "Setup exited {} for instance {}: {}",
                        out.exit_code, instance.id, out.output
                    );
                }
                Err(e) => {
                    warn!("Setup exec failed for instance {}: {}", instance.id, e);
                }
            }
        });
    }

    /// Undo a partial create: best-effort container and directory removal,
    /// then drop the registry row so the subdomain and ports free up.
    async fn rollback(&self, instance: &Instance) {
        let name = self.container_name(&instance.subdomain);
        if let Err(e) = self.runtime.remove(&name, true).await {
            warn!("Rollback: failed to remove container {}: {}", name, e);
        }
        let home = self.tenant_dir(&instance.subdomain);
        if let Err(e) = tokio::fs::remove_dir_all(&home).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Rollback: failed to remove {}: {}", home.display(), e);
            }
        }
        if let Err(e) = self.registry.delete(&instance.id).await {
            warn!(
                "Rollback: failed to delete registry row {}: {}",
                instance.id, e
            );
        }
    }
}

/// Lowercase alphanumeric-and-hyphen, 3-30 chars, no edge hyphens. The slug
/// doubles as a DNS label and a path segment, so the format is strict.
fn validate_subdomain(subdomain: &str) -> Result<()> {
    let len = subdomain.chars().count();
    if !(SUBDOMAIN_MIN_LEN..=SUBDOMAIN_MAX_LEN).contains(&len) {
        return Err(LifecycleError::Validation(format!(
            "'{}' must be {}-{} characters",
            subdomain, SUBDOMAIN_MIN_LEN, SUBDOMAIN_MAX_LEN
        )));
    }
    if !subdomain
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(LifecycleError::Validation(format!(
            "'{}' may only contain lowercase letters, digits and hyphens",
            subdomain
        )));
    }
    if subdomain.starts_with('-') || subdomain.ends_with('-') {
        return Err(LifecycleError::Validation(format!(
            "'{}' may not start or end with a hyphen",
            subdomain
        )));
    }
    Ok(())
}
