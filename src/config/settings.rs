//! User configuration settings
//!
//! Layered configuration: environment variables → config file → CLI args

use std::path::PathBuf;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Error, Result};

/// Default number of commits published after a refresh
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Default size of the background operation pool
pub const DEFAULT_MAX_CONCURRENT_OPERATIONS: usize = 4;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding preferences and the credential key
    pub data_dir: Option<PathBuf>,

    /// Number of commits published with every status refresh
    pub history_limit: usize,

    /// Maximum repository operations running at once
    pub max_concurrent_operations: usize,

    /// Enable debug logging
    pub debug: bool,

    /// Log file path (if set, logs to file instead of stderr)
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_concurrent_operations: DEFAULT_MAX_CONCURRENT_OPERATIONS,
            debug: false,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;

        let config: Config = Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Config::default()))
            // Layer config file if it exists
            .merge(Toml::file(&config_path))
            // Layer environment variables (GW_HISTORY_LIMIT, etc.)
            .merge(Env::prefixed("GW_"))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_operations == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrent_operations".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if self.history_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "history_limit".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Get the configuration file path
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = Self::project_dirs()?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            Ok(dir.clone())
        } else {
            let dirs = Self::project_dirs()?;
            Ok(dirs.data_dir().to_path_buf())
        }
    }

    /// Get the preferences file path
    pub fn preferences_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("preferences.json"))
    }

    /// Get the credential key file path
    pub fn key_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("credential.key"))
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        let dirs = Self::project_dirs()?;

        std::fs::create_dir_all(dirs.config_dir()).map_err(|_e| {
            Error::Config(ConfigError::DirectoryCreationFailed(
                dirs.config_dir().to_path_buf(),
            ))
        })?;

        let data_dir = self.data_dir()?;
        std::fs::create_dir_all(&data_dir)
            .map_err(|_| Error::Config(ConfigError::DirectoryCreationFailed(data_dir)))?;

        // Seed a default config file if none exists so users can discover it
        let config_path = Self::config_file_path()?;
        if !config_path.exists() {
            let _ = Config::default().save();
        }

        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|_e| {
                Error::Config(ConfigError::DirectoryCreationFailed(parent.to_path_buf()))
            })?;
        }

        let toml =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        std::fs::write(&config_path, toml).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "git-workbench", "git-workbench").ok_or_else(|| {
            Error::Config(ConfigError::LoadFailed(
                "Could not determine home directory".to_string(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.history_limit, 20);
        assert_eq!(config.max_concurrent_operations, 4);
        assert!(!config.debug);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("history_limit"));
        assert!(toml.contains("max_concurrent_operations"));
    }

    #[test]
    fn test_explicit_data_dir() {
        let config = Config {
            data_dir: Some(PathBuf::from("/tmp/gw")),
            ..Default::default()
        };
        assert_eq!(
            config.preferences_path().unwrap(),
            PathBuf::from("/tmp/gw/preferences.json")
        );
        assert_eq!(config.key_path().unwrap(), PathBuf::from("/tmp/gw/credential.key"));
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let config = Config {
            max_concurrent_operations: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
