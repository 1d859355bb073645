// ABOUTME: Lifecycle manager driving instance containers through their state machine
// ABOUTME: stopped -> running | error, running <-> stopped, any -> deleted

mod error;
mod manager;

pub use error::LifecycleError;
pub use manager::{LifecycleConfig, LifecycleManager};

pub type Result<T> = std::result::Result<T, LifecycleError>;
