// ABOUTME: Environment variable parsing utilities
// ABOUTME: Helper functions for reading configuration values with defaults

use std::str::FromStr;

/// Parse an environment variable with a fallback default value.
/// Logs a warning when the variable is set but cannot be parsed.
pub fn parse_env_or_default<T>(var_name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match std::env::var(var_name) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(
                    "Environment variable {} has unparseable value '{}', using default: {}",
                    var_name,
                    raw,
                    default
                );
                default
            }
        },
        Err(_) => default,
    }
}

/// Read a string environment variable with a fallback default.
pub fn env_or_default(var_name: &str, default: &str) -> String {
    std::env::var(var_name).unwrap_or_else(|_| default.to_string())
}
