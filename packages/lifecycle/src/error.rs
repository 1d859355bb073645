use roost_registry::RegistryError;
use roost_runtime::RuntimeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Invalid subdomain: {0}")]
    Validation(String),

    #[error("Subdomain already taken: {0}")]
    Conflict(String),

    #[error("Instance not found: {0}")]
    NotFound(String),

    #[error("Instance {0} has no container")]
    NoContainer(String),

    /// Provisioning failed before the container started; the registry row
    /// has already been rolled back.
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}
