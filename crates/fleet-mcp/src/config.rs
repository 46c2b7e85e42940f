use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
pub struct UserConfig {
    pub logging: Option<LoggingCfg>,
    pub mcp: Option<McpCfg>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingCfg {
    pub to_file: Option<bool>,
    pub dir: Option<String>,
    pub json: Option<bool>,
    pub compact: Option<bool>,
    pub pretty: Option<bool>,
    pub level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct McpCfg {
    pub enabled: Option<bool>,
    pub servers_file: Option<String>, // relative paths resolve against the cwd
    pub timeout_seconds: Option<u64>,
    pub probe_environment: Option<bool>,
}

pub fn load_user_config(fleet_home: &Path) -> anyhow::Result<Option<UserConfig>> {
    let path = fleet_home.join("config.toml");
    if !path.exists() {
        return Ok(None);
    }
    let s = std::fs::read_to_string(&path)?;
    let cfg: UserConfig = toml::from_str(&s)?;
    Ok(Some(cfg))
}

/// `explicit` if non-empty, else `$HOME/.fleet-mcp`, else `./.fleet-mcp`.
pub fn fleet_home(explicit: &str) -> PathBuf {
    if !explicit.is_empty() {
        return expand_home(explicit);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".fleet-mcp");
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".fleet-mcp")
}

pub fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Ok(home) = std::env::var("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(path)
}

/// Env value when the variable is set, else the config value, else the env
/// default.
pub fn layered<T>(env_is_set: bool, env_value: T, configured: Option<T>) -> T {
    if env_is_set {
        return env_value;
    }
    configured.unwrap_or(env_value)
}
