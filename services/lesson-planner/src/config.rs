//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The database key is loaded from DATABASE_API_KEY or api_key_file,
//! never stored in the TOML directly.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Always authorized; the only users allowed to manage the allow-list
    #[serde(default)]
    pub admin_emails: Vec<String>,
}

/// Remote database (PostgREST endpoint)
#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(skip)]
    pub api_key: Option<Secret<String>>,
    /// Path to a file containing the key (alternative to DATABASE_API_KEY)
    #[serde(default)]
    pub api_key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolBackend {
    #[default]
    Remote,
    File,
}

/// Where provider keys come from
#[derive(Debug, Default, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub backend: PoolBackend,
    /// Key file for the `file` backend
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Reactivate exhausted keys after this many seconds (`file` backend)
    #[serde(default)]
    pub reactivate_after_secs: Option<u64>,
}

/// Provider and rotation settings
#[derive(Debug, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            max_attempts: default_max_attempts(),
            attempt_timeout_secs: default_attempt_timeout(),
        }
    }
}

impl GenerationConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

impl PoolConfig {
    pub fn reactivate_after(&self) -> Option<Duration> {
        self.reactivate_after_secs.map(Duration::from_secs)
    }
}

fn default_max_connections() -> usize {
    1000
}

fn default_base_url() -> String {
    provider::gemini::DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    provider::gemini::DEFAULT_MODEL.to_string()
}

fn default_max_attempts() -> u32 {
    generation::DEFAULT_MAX_ATTEMPTS
}

fn default_attempt_timeout() -> u64 {
    60
}

fn require_http(field: &str, url: &str) -> common::Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {url}"
        )))
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Database key resolution order:
    /// 1. DATABASE_API_KEY env var
    /// 2. api_key_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        require_http("generation.base_url", &config.generation.base_url)?;

        if config.generation.max_attempts == 0 {
            return Err(common::Error::Config(
                "max_attempts must be greater than 0".into(),
            ));
        }

        if config.generation.attempt_timeout_secs == 0 {
            return Err(common::Error::Config(
                "attempt_timeout_secs must be greater than 0".into(),
            ));
        }

        config.server.admin_emails = config
            .server
            .admin_emails
            .iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        if let Some(database) = config.database.as_mut() {
            require_http("database.url", &database.url)?;

            if let Ok(key) = std::env::var("DATABASE_API_KEY") {
                database.api_key = Some(Secret::new(key));
            } else if let Some(ref key_file) = database.api_key_file {
                let key = std::fs::read_to_string(key_file).map_err(|e| {
                    common::Error::Config(format!(
                        "failed to read api_key_file {}: {e}",
                        key_file.display()
                    ))
                })?;
                let key = key.trim().to_owned();
                if !key.is_empty() {
                    database.api_key = Some(Secret::new(key));
                }
            }

            if database.api_key.is_none() {
                return Err(common::Error::Config(
                    "database requires DATABASE_API_KEY or api_key_file".into(),
                ));
            }
        }

        match config.pool.backend {
            PoolBackend::Remote if config.database.is_none() => {
                return Err(common::Error::Config(
                    "pool backend \"remote\" requires a [database] section".into(),
                ));
            }
            PoolBackend::File if config.pool.file.is_none() => {
                return Err(common::Error::Config(
                    "pool backend \"file\" requires pool.file".into(),
                ));
            }
            _ => {}
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("lesson-planner.toml")
    }
}
