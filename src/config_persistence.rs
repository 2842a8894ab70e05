//! Configuration persistence for federation setups
//!
//! A federation configuration can be stored next to a deployment and loaded
//! on startup. The persisted form carries a format version, timestamps and a
//! CRC32 checksum over the serialized configuration, and is written with a
//! temporary file and an atomic rename. The previous file is kept as a backup.

use crate::config::FederationConfig;
use crate::error::FederationError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Current version of the persisted configuration format
pub const CONFIG_VERSION: u32 = 1;

/// Configuration file name
pub const CONFIG_FILE: &str = "federation.config";

/// Backup configuration file name
pub const CONFIG_BACKUP_FILE: &str = "federation.config.bak";

/// Persisted configuration with versioning and integrity checking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedConfig {
    /// Version of the configuration format
    pub version: u32,
    /// The federation configuration
    pub config: FederationConfig,
    /// When the configuration was first persisted
    pub created_at: SystemTime,
    /// When the configuration was last saved
    pub modified_at: SystemTime,
    /// CRC32 of the serialized configuration
    pub checksum: u32,
}

impl PersistedConfig {
    /// Wrap a validated configuration
    pub fn new(config: FederationConfig) -> Result<Self> {
        config.validate()?;

        let now = SystemTime::now();
        let checksum = checksum_of(&config)?;
        Ok(Self {
            version: CONFIG_VERSION,
            config,
            created_at: now,
            modified_at: now,
            checksum,
        })
    }

    /// Save the configuration to `path` atomically
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.modified_at = SystemTime::now();
        self.checksum = checksum_of(&self.config)?;

        create_backup(path)?;

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| FederationError::Serialization(format!("Failed to serialize configuration: {}", e)))?;

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json).map_err(|e| {
            FederationError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write configuration to {}: {}", temp_path.display(), e),
            ))
        })?;

        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            FederationError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to move configuration from {} to {}: {}",
                    temp_path.display(),
                    path.display(),
                    e
                ),
            ))
        })?;

        tracing::debug!(path = %path.display(), checksum = self.checksum, "Saved federation configuration");
        Ok(())
    }

    /// Load and verify a configuration from `path`
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            FederationError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read configuration file {}: {}", path.display(), e),
            ))
        })?;

        let persisted: Self = serde_json::from_str(&content).map_err(|e| {
            FederationError::Corruption(format!("Failed to parse configuration file {}: {}", path.display(), e))
        })?;

        let expected = checksum_of(&persisted.config)?;
        if expected != persisted.checksum {
            return Err(FederationError::Corruption(format!(
                "Configuration file checksum mismatch: expected {}, got {}",
                expected, persisted.checksum
            )));
        }

        if persisted.version > CONFIG_VERSION {
            return Err(FederationError::Config(format!(
                "Unsupported configuration version: found {}, maximum supported {}",
                persisted.version, CONFIG_VERSION
            )));
        }

        persisted.config.validate()?;
        Ok(persisted)
    }

    /// Load the backup written by the last save and copy it over `path`
    pub fn restore_from_backup(path: &Path) -> Result<Self> {
        let backup_path = backup_path_for(path);
        if !backup_path.exists() {
            return Err(FederationError::Config(format!(
                "No backup configuration file found at {}",
                backup_path.display()
            )));
        }

        let restored = Self::load(&backup_path)?;
        fs::copy(&backup_path, path).map_err(|e| {
            FederationError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to restore backup from {} to {}: {}",
                    backup_path.display(),
                    path.display(),
                    e
                ),
            ))
        })?;

        tracing::info!(path = %path.display(), "Restored federation configuration from backup");
        Ok(restored)
    }
}

fn checksum_of(config: &FederationConfig) -> Result<u32> {
    let bytes = serde_json::to_vec(config)
        .map_err(|e| FederationError::Serialization(format!("Failed to serialize config for checksum: {}", e)))?;
    Ok(crc32fast::hash(&bytes))
}

fn backup_path_for(path: &Path) -> PathBuf {
    path.parent().unwrap_or_else(|| Path::new(".")).join(CONFIG_BACKUP_FILE)
}

fn create_backup(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let backup_path = backup_path_for(path);
    fs::copy(path, &backup_path).map_err(|e| {
        FederationError::Io(std::io::Error::new(
            e.kind(),
            format!(
                "Failed to create backup from {} to {}: {}",
                path.display(),
                backup_path.display(),
                e
            ),
        ))
    })?;
    Ok(())
}

/// Loads and stores the configuration file of one deployment directory
#[derive(Debug)]
pub struct ConfigurationManager {
    config_path: PathBuf,
}

impl ConfigurationManager {
    /// Create a manager for `directory/federation.config`
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            config_path: directory.as_ref().join(CONFIG_FILE),
        }
    }

    /// Path of the managed file
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Whether a configuration has been saved
    pub fn config_exists(&self) -> bool {
        self.config_path.exists()
    }

    /// Save a configuration, keeping the creation time of an existing file
    pub fn save_config(&self, config: &FederationConfig) -> Result<()> {
        let mut persisted = PersistedConfig::new(config.clone())?;
        if self.config_exists() {
            if let Ok(existing) = PersistedConfig::load(&self.config_path) {
                persisted.created_at = existing.created_at;
            }
        }
        persisted.save(&self.config_path)
    }

    /// Load the saved configuration
    pub fn load_config(&self) -> Result<FederationConfig> {
        PersistedConfig::load(&self.config_path).map(|persisted| persisted.config)
    }

    /// Restore the previous configuration from the backup file
    pub fn restore_from_backup(&self) -> Result<FederationConfig> {
        PersistedConfig::restore_from_backup(&self.config_path).map(|persisted| persisted.config)
    }
}
