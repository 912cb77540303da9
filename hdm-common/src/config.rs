//! Configuration loading and config-file resolution
//!
//! Bootstrap settings live in a single TOML file. The file is optional:
//! a missing file means compiled defaults, never a startup failure.
//!
//! **Config file priority:**
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`HDM_CONFIG`)
//! 3. Platform config directory (`<config_dir>/hdm/<module>.toml`)
//! 4. None (compiled defaults)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "HDM_CONFIG";

/// Bootstrap configuration loaded from TOML file
///
/// These settings cannot change while running.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address to bind the HTTP listener to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// SQLite database for watch-state persistence (optional)
    ///
    /// When absent, watch state lives in process memory only.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            database_path: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolves which config file (if any) a module should read
pub struct ConfigResolver {
    module_name: String,
}

impl ConfigResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
        }
    }

    /// Resolve the config file path following the priority order above
    ///
    /// Explicit sources (CLI, ENV) are returned even if the file does not
    /// exist so the caller can report it; the platform default is only
    /// returned when present.
    pub fn resolve(&self, cli_arg: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = cli_arg {
            return Some(path.to_path_buf());
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        let default_path = self.default_config_path()?;
        if default_path.exists() {
            Some(default_path)
        } else {
            None
        }
    }

    /// Platform config location: `<config_dir>/hdm/<module>.toml`
    pub fn default_config_path(&self) -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("hdm").join(format!("{}.toml", self.module_name)))
    }
}

/// Read the raw TOML text of a config file
///
/// Missing or unreadable files are not errors: a warning is logged and
/// `None` is returned so the caller falls back to defaults.
pub fn read_config_text(path: Option<&Path>) -> Option<String> {
    let path = path?;
    match std::fs::read_to_string(path) {
        Ok(content) => {
            info!("Loaded config file: {}", path.display());
            Some(content)
        }
        Err(e) => {
            warn!(
                "Config file {} could not be read ({}); using built-in defaults",
                path.display(),
                e
            );
            None
        }
    }
}

/// Parse bootstrap config from TOML text (None → defaults)
pub fn parse_toml_config(content: Option<&str>) -> Result<TomlConfig> {
    match content {
        Some(text) => toml::from_str(text)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e))),
        None => Ok(TomlConfig::default()),
    }
}

/// Resolve a single setting from ENV → TOML
///
/// **Priority:** Environment variable wins over the TOML value. Blank
/// values are ignored. Finding the value in both places logs a warning
/// since it usually means a stale TOML entry.
pub fn resolve_setting(name: &str, env_var: &str, toml_value: Option<&str>) -> Option<String> {
    let env_value = std::env::var(env_var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let toml_value = toml_value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    match (env_value, toml_value) {
        (Some(env), Some(_)) => {
            warn!(
                "{} found in both {} and TOML config. Using environment (highest priority).",
                name, env_var
            );
            Some(env)
        }
        (Some(env), None) => {
            info!("{} loaded from environment variable", name);
            Some(env)
        }
        (None, Some(toml)) => {
            info!("{} loaded from TOML config", name);
            Some(toml)
        }
        (None, None) => None,
    }
}
