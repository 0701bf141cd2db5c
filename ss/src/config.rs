//! simstate configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::{FileBackend, IndexStrategy, KeyValueBackend, RedisClient, RelationalBackend};
use crate::store::{StateBackend, StateStore, StoreOptions};

/// Key prefix used when the configuration does not name one
pub const DEFAULT_KEY_PREFIX: &str = "sim:state";

/// Main simstate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Store settings and results logs in compact form
    pub compress: bool,

    /// Where instances are stored
    pub backend: BackendConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            compress: true,
            backend: BackendConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    ///
    /// Explicit path, then `./simstate.yml`, then
    /// `~/.config/simstate/simstate.yml`, then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from("simstate.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("simstate").join("simstate.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up; failures yield `None`
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            compress: self.compress,
        }
    }

    /// Open the configured backend and wrap it in a store
    pub fn open_store(&self) -> Result<StateStore<Box<dyn StateBackend>>> {
        let backend = self.backend.open()?;
        Ok(StateStore::new(backend, self.store_options()))
    }
}

/// Storage backend selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// One JSON file per instance in a directory
    File {
        #[serde(default = "default_file_dir")]
        path: PathBuf,
    },

    /// One row per instance in a SQLite database
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },

    /// One value per instance in Redis
    Redis(RedisConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::File {
            path: default_file_dir(),
        }
    }
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::File { .. } => "file",
            BackendConfig::Sqlite { .. } => "sqlite",
            BackendConfig::Redis(_) => "redis",
        }
    }

    pub fn open(&self) -> Result<Box<dyn StateBackend>> {
        tracing::debug!(kind = self.kind(), "BackendConfig::open: called");
        let backend: Box<dyn StateBackend> = match self {
            BackendConfig::File { path } => Box::new(
                FileBackend::open(path).context(format!("Failed to open state directory {}", path.display()))?,
            ),
            BackendConfig::Sqlite { path } => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    fs::create_dir_all(parent).context("Failed to create database directory")?;
                }
                Box::new(
                    RelationalBackend::open(path).context(format!("Failed to open database {}", path.display()))?,
                )
            }
            BackendConfig::Redis(redis) => {
                let client = match redis.timeout_ms {
                    Some(ms) => RedisClient::open_with_timeout(&redis.url, Duration::from_millis(ms)),
                    None => RedisClient::open(&redis.url),
                }
                .context(format!("Failed to connect to {}", redis.url))?;
                Box::new(KeyValueBackend::new(client, redis.key_prefix.clone(), redis.index))
            }
        };
        Ok(backend)
    }
}

/// Redis connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,

    /// Namespace for instance keys
    #[serde(rename = "key-prefix")]
    pub key_prefix: String,

    pub index: IndexStrategy,

    /// Connect, read and write timeout; unbounded when unset
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: Option<u64>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/".to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            index: IndexStrategy::default(),
            timeout_ms: None,
        }
    }
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("simstate")
}

fn default_file_dir() -> PathBuf {
    data_dir().join("instances")
}

fn default_sqlite_path() -> PathBuf {
    data_dir().join("state.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::InstanceRecord;
    use crate::state_map;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.compress);
        assert_eq!(config.backend.kind(), "file");
    }

    #[test]
    fn test_parse_redis_backend() {
        let yaml = r#"
log-level: DEBUG
compress: false
backend:
  kind: redis
  url: redis://cache:6379/2
  index: scan
  timeout-ms: 1500
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("DEBUG"));
        assert!(!config.compress);
        assert_eq!(
            config.backend,
            BackendConfig::Redis(RedisConfig {
                url: "redis://cache:6379/2".to_string(),
                key_prefix: DEFAULT_KEY_PREFIX.to_string(),
                index: IndexStrategy::Scan,
                timeout_ms: Some(1500),
            })
        );
    }

    #[test]
    fn test_parse_sqlite_backend() {
        let config: Config = serde_yaml::from_str("backend:\n  kind: sqlite\n  path: /tmp/s.db\n").unwrap();
        assert_eq!(
            config.backend,
            BackendConfig::Sqlite {
                path: PathBuf::from("/tmp/s.db")
            }
        );
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(serde_yaml::from_str::<Config>("backend:\n  kind: mongo\n").is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("simstate.yml");
        fs::write(&path, "log-level: WARN\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("WARN"));
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("WARN"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.yml");
        assert!(Config::load(Some(&path)).is_err());
        assert!(Config::load_log_level(Some(&path)).is_none());
    }

    #[test]
    fn test_open_store_file_and_sqlite() {
        let temp = TempDir::new().unwrap();
        let configs = [
            BackendConfig::File {
                path: temp.path().join("files"),
            },
            BackendConfig::Sqlite {
                path: temp.path().join("state.db"),
            },
        ];
        for backend in configs {
            let config = Config {
                backend,
                ..Config::default()
            };
            let store = config.open_store().unwrap();
            store.save_instance(&InstanceRecord::new("a", state_map! { "v" => 1 }, 1)).unwrap();
            assert_eq!(store.load_all().unwrap().len(), 1);
        }
    }
}
