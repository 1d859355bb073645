// ABOUTME: Durable instance registry backed by SQLite
// ABOUTME: Pure data access for instance rows plus the serialized port allocator

mod error;
mod instance;
mod store;

pub use error::RegistryError;
pub use instance::{Instance, InstanceStatus, NewInstance};
pub use store::InstanceRegistry;

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Embedded schema migrations, run by the server binary (and tests) at startup.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();
