// ABOUTME: Server configuration assembled from ROOST_* environment variables
// ABOUTME: Every tunable has a default; a bare `roostd` starts a local single-host setup

use std::path::PathBuf;

use roost_config::constants::*;
use roost_config::{env_or_default, parse_env_or_default};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_host: String,
    pub http_port: u16,
    pub base_domain: String,
    pub route_prefix: String,
    pub api_subdomain: String,
    pub external_scheme: String,
    pub db_path: PathBuf,
    pub port_base: u16,
    pub data_dir: PathBuf,
    pub tools_dir: PathBuf,
    pub instance_image: String,
    pub container_prefix: String,
    pub max_instances_per_owner: i64,
    pub shell_user: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            bind_host: env_or_default(ROOST_BIND_HOST, "0.0.0.0"),
            http_port: parse_env_or_default(ROOST_HTTP_PORT, 4100u16),
            base_domain: env_or_default(ROOST_BASE_DOMAIN, "roost.local"),
            route_prefix: env_or_default(ROOST_ROUTE_PREFIX, "i"),
            api_subdomain: env_or_default(ROOST_API_SUBDOMAIN, "api"),
            external_scheme: env_or_default(ROOST_EXTERNAL_SCHEME, "https"),
            db_path: PathBuf::from(env_or_default(ROOST_DB_PATH, "/var/lib/roost/roost.db")),
            port_base: parse_env_or_default(ROOST_PORT_BASE, 20000u16),
            data_dir: PathBuf::from(env_or_default(
                ROOST_DATA_DIR,
                "/var/lib/roost/instances",
            )),
            tools_dir: PathBuf::from(env_or_default(ROOST_TOOLS_DIR, "/var/lib/roost/tools")),
            instance_image: env_or_default(ROOST_INSTANCE_IMAGE, "roost/instance:latest"),
            container_prefix: env_or_default(ROOST_CONTAINER_PREFIX, "roost"),
            max_instances_per_owner: parse_env_or_default(ROOST_MAX_INSTANCES_PER_OWNER, 5i64),
            shell_user: env_or_default(ROOST_SHELL_USER, "agent"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_form_a_complete_config() {
        let config = ServerConfig::from_env();
        assert!(config.http_port > 0);
        assert!(!config.base_domain.is_empty());
        assert!(!config.route_prefix.is_empty());
        assert!(config.port_base >= 1024);
    }
}
