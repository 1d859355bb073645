use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Container runtime not available: {0}")]
    Unavailable(String),

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Container {container_ref} not running after {attempts} attempts (last status: {last_status})")]
    NotRunning {
        container_ref: String,
        attempts: u32,
        last_status: String,
    },

    #[error("Exec was detached unexpectedly")]
    ExecDetached,

    #[error("Runtime operation failed: {0}")]
    Failed(String),
}
