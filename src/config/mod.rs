// Config module - application config plus the layered settings stores

mod store;
mod watcher;

#[cfg(test)]
pub use store::MemoryStore;
pub use store::{ConfigScope, ConfigStore, ConfigValue, LayeredConfig, TomlConfigStore};
pub use watcher::{ConfigEvent, ConfigWatcher};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use directories::BaseDirs;

use crate::error::{BridgeError, Result};

const CONFIG_DIR: &str = "pylsp-bridge";
const MAIN_CONFIG_FILE: &str = "config.toml";
const GLOBAL_SETTINGS_FILE: &str = "settings.toml";
const WORKSPACE_SETTINGS_DIR: &str = ".pylsp-bridge";

/// Settings store errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub server: ServerConfig,
    pub settings: SettingsConfig,
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub watch_config: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
            watch_config: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Delay between starting the server and the first configuration push
    pub initialized_grace_ms: u64,
    pub shutdown_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            initialized_grace_ms: 500,
            shutdown_timeout_secs: 5,
            request_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn initialized_grace(&self) -> Duration {
        Duration::from_millis(self.initialized_grace_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Window in which repeated change notifications for one key are dropped
    pub debounce_ms: u64,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self { debounce_ms: 10 }
    }
}

impl SettingsConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProbeConfig {
    /// Override for the environment detection script
    pub script: Option<PathBuf>,
}

pub struct ConfigManager {
    config_dir: PathBuf,
    workspace_dir: PathBuf,
    app_config: AppConfig,
}

impl ConfigManager {
    pub fn new(workspace_dir: PathBuf, config_dir: Option<PathBuf>) -> Result<Self> {
        if !workspace_dir.is_dir() {
            return Err(BridgeError::WorkspaceNotFound { path: workspace_dir });
        }

        let config_dir = match config_dir {
            Some(dir) => dir,
            None => Self::default_config_dir()?,
        };
        let app_config = Self::load_app_config(&config_dir);

        Ok(Self {
            config_dir,
            workspace_dir,
            app_config,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    pub fn app_config(&self) -> &AppConfig {
        &self.app_config
    }

    pub fn global_settings_path(&self) -> PathBuf {
        self.config_dir.join(GLOBAL_SETTINGS_FILE)
    }

    pub fn workspace_settings_path(&self) -> PathBuf {
        self.workspace_dir
            .join(WORKSPACE_SETTINGS_DIR)
            .join(GLOBAL_SETTINGS_FILE)
    }

    /// Open both settings layers from disk
    pub fn open_settings(&self) -> LayeredConfig {
        LayeredConfig::new(
            Box::new(TomlConfigStore::open(self.workspace_settings_path())),
            Box::new(TomlConfigStore::open(self.global_settings_path())),
        )
    }

    /// Directory used for files materialized at runtime (detection script)
    pub fn cache_dir(&self) -> PathBuf {
        BaseDirs::new()
            .map(|dirs| dirs.cache_dir().join(CONFIG_DIR))
            .unwrap_or_else(|| self.config_dir.join("cache"))
    }

    fn default_config_dir() -> Result<PathBuf> {
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join(CONFIG_DIR))
            .ok_or_else(|| BridgeError::Config("Could not determine config directory".to_string()))
    }

    fn load_app_config(config_dir: &Path) -> AppConfig {
        let path = config_dir.join(MAIN_CONFIG_FILE);
        Self::load_toml_file(&path).unwrap_or_default()
    }

    fn load_toml_file<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Option<T> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn write_default_config(&self) -> Result<()> {
        if !self.config_dir.exists() {
            std::fs::create_dir_all(&self.config_dir)
                .map_err(|e| BridgeError::Config(format!("Failed to create config dir: {}", e)))?;
        }

        let main_path = self.config_dir.join(MAIN_CONFIG_FILE);
        if !main_path.exists() {
            let content = toml::to_string_pretty(&AppConfig::default())
                .map_err(|e| BridgeError::Config(format!("Failed to serialize config: {}", e)))?;
            std::fs::write(&main_path, content)
                .map_err(|e| BridgeError::Config(format!("Failed to write config: {}", e)))?;
        }

        Ok(())
    }
}
