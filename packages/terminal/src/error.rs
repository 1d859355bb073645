use roost_registry::RegistryError;
use roost_runtime::RuntimeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Instance not found: {0}")]
    NotFound(String),

    #[error("Not authorized for instance {0}")]
    NotAuthorized(String),

    #[error("Instance {0} has no container yet")]
    NoContainer(String),

    /// Embeds the recent container log tail so crash loops are diagnosable
    /// from the client side.
    #[error("Container {container_ref} not ready: {reason}\nRecent container logs:\n{logs}")]
    ContainerNotReady {
        container_ref: String,
        reason: String,
        logs: String,
    },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Session stream error: {0}")]
    Stream(String),
}
