use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Instance not found: {0}")]
    NotFound(String),

    #[error("Subdomain already taken: {0}")]
    SubdomainTaken(String),

    #[error("Invalid instance row: {0}")]
    InvalidRow(String),
}
