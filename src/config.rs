use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache root. Defaults to the platform cache directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    #[serde(default = "default_cache_size_gb")]
    pub max_size_gb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RemoteConfig {
    /// Base URL of the remote store API.
    #[serde(default)]
    pub api_base: String,

    /// One opaque credential per session; the pool size is the list length.
    #[serde(default)]
    pub credentials: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Index database path. Defaults to the platform data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            debug!("Loading config from {:?}", config_path);
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            info!("Config loaded successfully");
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, contents).context("Failed to write config file")?;

        debug!("Config saved to {:?}", config_path);
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("TIDEGATE_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(config_dir.join("tidegate").join("config.toml"))
    }

    pub fn cache_directory(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache.directory {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir().context("Failed to get cache directory")?;
        Ok(cache_dir.join("tidegate").join("media"))
    }

    pub fn cache_max_bytes(&self) -> u64 {
        (self.cache.max_size_gb * 1024.0 * 1024.0 * 1024.0) as u64
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database.path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir().context("Failed to get data directory")?;
        Ok(data_dir.join("tidegate").join("index.db"))
    }

    /// Session count is driven by the credential list; a pool always has at
    /// least one slot.
    pub fn session_count(&self) -> usize {
        self.remote.credentials.len().max(1)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            directory: None,
            max_size_gb: default_cache_size_gb(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_cache_size_gb() -> f64 {
    10.0
}
