// ABOUTME: Instance data model shared across the control plane
// ABOUTME: Status enum and the serializable instance record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an instance. Mutated only by the lifecycle manager;
/// the router and terminal broker read it but never write it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Stopped,
    Running,
    Installing,
    Error,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Running => "running",
            InstanceStatus::Installing => "installing",
            InstanceStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stopped" => Some(InstanceStatus::Stopped),
            "running" => Some(InstanceStatus::Running),
            "installing" => Some(InstanceStatus::Installing),
            "error" => Some(InstanceStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tenant's provisioned isolated runtime environment and its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub owner_id: String,
    /// Lowercase alphanumeric-and-hyphen slug, 3-30 chars, globally unique.
    /// Used both as DNS label and as the path-routing segment.
    pub subdomain: String,
    pub ssh_port: u16,
    pub gateway_port: u16,
    /// Opaque handle to the backing container; None until provisioning succeeds.
    pub container_ref: Option<String>,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_stopped_at: Option<DateTime<Utc>>,
}

/// Fields supplied by the caller at creation; id, ports and timestamps are
/// assigned by the registry.
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub owner_id: String,
    pub subdomain: String,
}
