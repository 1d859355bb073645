// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Roost

// HTTP server
pub const ROOST_HTTP_PORT: &str = "ROOST_HTTP_PORT";
pub const ROOST_BIND_HOST: &str = "ROOST_BIND_HOST";

// Routing
pub const ROOST_BASE_DOMAIN: &str = "ROOST_BASE_DOMAIN";
pub const ROOST_ROUTE_PREFIX: &str = "ROOST_ROUTE_PREFIX";
pub const ROOST_API_SUBDOMAIN: &str = "ROOST_API_SUBDOMAIN";
pub const ROOST_EXTERNAL_SCHEME: &str = "ROOST_EXTERNAL_SCHEME";

// Registry / database
pub const ROOST_DB_PATH: &str = "ROOST_DB_PATH";
pub const ROOST_PORT_BASE: &str = "ROOST_PORT_BASE";

// Instance provisioning
pub const ROOST_DATA_DIR: &str = "ROOST_DATA_DIR";
pub const ROOST_TOOLS_DIR: &str = "ROOST_TOOLS_DIR";
pub const ROOST_INSTANCE_IMAGE: &str = "ROOST_INSTANCE_IMAGE";
pub const ROOST_CONTAINER_PREFIX: &str = "ROOST_CONTAINER_PREFIX";
pub const ROOST_MAX_INSTANCES_PER_OWNER: &str = "ROOST_MAX_INSTANCES_PER_OWNER";

// Terminal sessions
pub const ROOST_SHELL_USER: &str = "ROOST_SHELL_USER";
