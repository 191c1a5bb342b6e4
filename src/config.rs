//! Configuration for where hydrated state is stored.
//!
//! A storage directory is either a filesystem path, which gets a SQLite
//! database file and the one-time legacy import, or the in-memory sentinel.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{HydrateError, Result};

/// Environment variable read by [`StorageConfig::from_env`].
pub const STORAGE_DIR_ENV: &str = "UNIVRS_HYDRATE_DIR";

/// Value of [`STORAGE_DIR_ENV`] selecting the in-memory sentinel.
pub const MEMORY_SENTINEL: &str = "memory";

/// Default database file name inside the storage directory.
pub const DEFAULT_DATABASE_FILE: &str = "hydrated_state.db";

/// Where entries live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageDirectory {
    /// Process memory only
    Memory,
    /// A directory on the local filesystem
    Path(PathBuf),
}

/// Configuration structure for the storage factory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage directory or the in-memory sentinel
    pub directory: StorageDirectory,
    /// Database file name inside the directory
    pub database_file: String,
    /// Import the legacy dump file on initialization
    pub migrate_legacy: bool,
}

impl StorageConfig {
    /// Configuration for in-memory storage
    pub fn in_memory() -> Self {
        StorageConfig {
            directory: StorageDirectory::Memory,
            database_file: DEFAULT_DATABASE_FILE.to_string(),
            migrate_legacy: false,
        }
    }

    /// Configuration for filesystem storage under `dir`
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        StorageConfig {
            directory: StorageDirectory::Path(dir.into()),
            database_file: DEFAULT_DATABASE_FILE.to_string(),
            migrate_legacy: true,
        }
    }

    /// Read the storage directory from [`STORAGE_DIR_ENV`].
    ///
    /// Unset, empty or [`MEMORY_SENTINEL`] selects in-memory storage.
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(STORAGE_DIR_ENV).ok().as_deref())
    }

    fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") | Some(MEMORY_SENTINEL) => Self::in_memory(),
            Some(dir) => Self::at(dir),
        }
    }

    /// Use a different database file name
    pub fn with_database_file(mut self, name: impl Into<String>) -> Self {
        self.database_file = name.into();
        self
    }

    /// Enable or disable the legacy import
    pub fn with_legacy_migration(mut self, enabled: bool) -> Self {
        self.migrate_legacy = enabled;
        self
    }

    /// Filesystem directory, `None` for in-memory storage
    pub fn directory_path(&self) -> Option<&Path> {
        match &self.directory {
            StorageDirectory::Memory => None,
            StorageDirectory::Path(path) => Some(path),
        }
    }

    /// Full path of the database file, `None` for in-memory storage
    pub fn database_path(&self) -> Option<PathBuf> {
        self.directory_path().map(|dir| dir.join(&self.database_file))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let StorageDirectory::Path(_) = self.directory {
            if self.database_file.is_empty() {
                return Err(HydrateError::InvalidConfig(
                    "database file name cannot be empty".to_string(),
                ));
            }
            if self.database_file.contains(['/', '\\']) {
                return Err(HydrateError::InvalidConfig(format!(
                    "database file name must not contain a path separator: {}",
                    self.database_file
                )));
            }
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_config() {
        let config = StorageConfig::in_memory();
        assert_eq!(config.directory, StorageDirectory::Memory);
        assert!(config.database_path().is_none());
        assert!(!config.migrate_legacy);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_path_config() {
        let config = StorageConfig::at("/var/lib/app");
        assert_eq!(
            config.database_path(),
            Some(PathBuf::from("/var/lib/app").join(DEFAULT_DATABASE_FILE))
        );
        assert!(config.migrate_legacy);
    }

    #[test]
    fn test_from_env_value() {
        assert_eq!(
            StorageConfig::from_env_value(None).directory,
            StorageDirectory::Memory
        );
        assert_eq!(
            StorageConfig::from_env_value(Some("memory")).directory,
            StorageDirectory::Memory
        );
        assert_eq!(
            StorageConfig::from_env_value(Some(" /data ")).directory,
            StorageDirectory::Path(PathBuf::from("/data"))
        );
    }

    #[test]
    fn test_validate_database_file() {
        let config = StorageConfig::at("/data").with_database_file("");
        assert!(config.validate().is_err());

        let config = StorageConfig::at("/data").with_database_file("nested/state.db");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("path separator"));

        // The file name is irrelevant in memory.
        let config = StorageConfig::in_memory().with_database_file("");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serde() {
        let config = StorageConfig::at("/data").with_legacy_migration(false);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: StorageConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.directory, config.directory);
        assert!(!parsed.migrate_legacy);
    }
}
