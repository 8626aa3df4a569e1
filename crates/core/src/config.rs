//! Config file parsing for `~/.config/moly-metadata/config.toml`.
//!
//! Use `lookup_options_from_config` to turn the loaded config into the
//! options a [`crate::lookup::moly::MolySource`] is built from.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::lookup::{LookupOptions, DEFAULT_BASE_URL};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub lookup: LookupConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    #[serde(default = "default_max_books")]
    pub max_books: usize,
    #[serde(default = "default_max_covers")]
    pub max_covers: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_max_books() -> usize {
    3
}
fn default_max_covers() -> usize {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            max_books: default_max_books(),
            max_covers: default_max_covers(),
            timeout_secs: default_timeout_secs(),
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// JSON file holding identifier and cover mappings between runs.
    /// Defaults to `<cache_dir>/moly-metadata/cache.json`.
    pub path: Option<String>,
}

impl CacheConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        match &self.path {
            Some(p) => Some(PathBuf::from(p)),
            None => dirs::cache_dir().map(|mut p| {
                p.push("moly-metadata");
                p.push("cache.json");
                p
            }),
        }
    }
}

/// Load config from the default path (`~/.config/moly-metadata/config.toml`).
pub fn load_config() -> AppConfig {
    let Some(path) = config_path() else {
        return AppConfig::default();
    };
    match load_config_from(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::debug!("Using default config ({}): {}", path.display(), e);
            AppConfig::default()
        }
    }
}

/// Load config from an explicit file.
pub fn load_config_from(path: &std::path::Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str::<AppConfig>(&content)?)
}

/// Write config to `path`, creating parent directories.
pub fn save_config(cfg: &AppConfig, path: &std::path::Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(cfg)?)?;
    Ok(())
}

/// Return the default config file path (for init and show).
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push("moly-metadata");
        p.push("config.toml");
        p
    })
}

/// Set a dot-separated key such as `lookup.max_books`.
pub fn set_config_key(cfg: &mut AppConfig, key: &str, value: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    };
    let parts: Vec<&str> = key.splitn(2, '.').collect();
    match parts.as_slice() {
        ["lookup", sub] => match *sub {
            "max_books" => cfg.lookup.max_books = value.parse().map_err(|_| invalid())?,
            "max_covers" => cfg.lookup.max_covers = value.parse().map_err(|_| invalid())?,
            "timeout_secs" => cfg.lookup.timeout_secs = value.parse().map_err(|_| invalid())?,
            "base_url" => cfg.lookup.base_url = value.trim_end_matches('/').to_string(),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        },
        ["cache", "path"] => cfg.cache.path = Some(value.to_string()),
        _ => return Err(ConfigError::UnknownKey(key.to_string())),
    }
    Ok(())
}

/// Build lookup options from config.
pub fn lookup_options_from_config(c: &LookupConfig) -> LookupOptions {
    LookupOptions {
        max_books: c.max_books.max(1),
        max_covers: c.max_covers,
        timeout: Duration::from_secs(c.timeout_secs),
        base_url: c.base_url.trim_end_matches('/').to_string(),
        ..LookupOptions::default()
    }
}
