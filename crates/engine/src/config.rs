//! Store configuration via `tessera.toml`
//!
//! A store opened on a data directory reads its settings from a config file
//! placed there. On first open a commented default file is written; edit it
//! and reopen to change settings.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tessera_core::{StoreError, StoreResult};

/// Config file name placed in the store data directory.
pub const CONFIG_FILE_NAME: &str = "tessera.toml";

/// Store configuration loaded from `tessera.toml`.
///
/// # Example
///
/// ```toml
/// # Keep every version of every cell in the historic tables
/// keep_all_versions = true
///
/// # Versions visited per qualifier by historic reads
/// max_versions_per_qualifier = 1000
///
/// # Buffered updates per subscriber before it lags
/// update_channel_capacity = 1024
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Mirror every write into the historic tables.
    #[serde(default)]
    pub keep_all_versions: bool,
    /// Default cap on versions per qualifier for historic reads.
    #[serde(default = "default_max_versions")]
    pub max_versions_per_qualifier: u32,
    /// Capacity of the update broadcast channel.
    #[serde(default = "default_channel_capacity")]
    pub update_channel_capacity: usize,
}

fn default_max_versions() -> u32 {
    1000
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            keep_all_versions: false,
            max_versions_per_qualifier: default_max_versions(),
            update_channel_capacity: default_channel_capacity(),
        }
    }
}

impl StoreConfig {
    /// Config with history retention switched on.
    pub fn with_history() -> Self {
        Self {
            keep_all_versions: true,
            ..Self::default()
        }
    }

    /// Check the values are usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cap or the channel capacity is zero.
    pub fn validate(&self) -> StoreResult<()> {
        if self.max_versions_per_qualifier == 0 {
            return Err(StoreError::request(
                "max_versions_per_qualifier in tessera.toml must be at least 1",
            ));
        }
        if self.update_channel_capacity == 0 {
            return Err(StoreError::request(
                "update_channel_capacity in tessera.toml must be at least 1",
            ));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tessera store configuration
#
# Keep every version of every cell in the historic tables (default: false)
# Required for reads with a to_version.
keep_all_versions = false

# Versions visited per qualifier by historic reads (default: 1000)
max_versions_per_qualifier = 1000

# Updates buffered per subscriber before it starts lagging (default: 1024)
update_channel_capacity = 1024
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> StoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| StoreError::ServerFail {
            message: format!("Failed to read config file '{}'", path.display()),
            source: Some(Box::new(e)),
        })?;
        let config: StoreConfig = toml::from_str(&content).map_err(|e| {
            StoreError::request(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> StoreResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| StoreError::ServerFail {
                message: format!("Failed to write default config file '{}'", path.display()),
                source: Some(Box::new(e)),
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> StoreResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| StoreError::server(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| StoreError::ServerFail {
            message: format!("Failed to write config file '{}'", path.display()),
            source: Some(Box::new(e)),
        })
    }
}
