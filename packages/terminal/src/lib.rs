// ABOUTME: Terminal session broker bridging client channels to container execs
// ABOUTME: Tracks concurrent sessions in memory; torn down on disconnect, exit, or stop/delete

mod broker;
mod error;

pub use broker::{BrokerConfig, SessionBroker, SessionEvent};
pub use error::BrokerError;

pub type Result<T> = std::result::Result<T, BrokerError>;
