// ABOUTME: Environment variable names and parsing utilities for Roost
// ABOUTME: Single place where ROOST_* configuration knobs are defined

pub mod constants;
pub mod env;

pub use env::{env_or_default, parse_env_or_default};
