//! Service configuration loaded from environment variables

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::sandbox::SandboxConfig;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: String,
    /// Language table override; the built-in table is used when unset
    pub languages_path: Option<PathBuf>,
    pub sandbox: SandboxConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            languages_path: env::var("LANGUAGES_CONFIG")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            sandbox: SandboxConfig::from_env(),
        }
    }
}

/// Parse `key` from the environment, falling back to `default` when unset or invalid
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
