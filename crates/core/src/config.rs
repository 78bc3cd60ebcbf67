//! Engine configuration
//!
//! TOML-backed settings for the patch engine, loaded from an explicit
//! path supplied by the host. Missing fields fall back to defaults so
//! old config files keep working.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Configuration system errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read or write the config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML content
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to serialize config to TOML
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings for a [`HookManager`](crate::HookManager) instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lowest address the pointer plausibility filter accepts.
    ///
    /// Anything at or below this is treated as a null-page or
    /// small-integer-as-pointer mistake and refused.
    pub min_valid_address: usize,

    /// Return patched pages to read-execute after each write.
    ///
    /// Some targets keep their vtables writable; turning this off skips
    /// the restore step entirely.
    pub restore_protection: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_valid_address: 0x1000,
            restore_protection: true,
        }
    }
}

impl EngineConfig {
    /// Load config from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config = Self::load_from_str(&content)?;
        tracing::debug!("Loaded engine config from {:?}", path.as_ref());
        Ok(config)
    }

    /// Parse config from a TOML string.
    pub fn load_from_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save config to a TOML file, creating parent directories as needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        tracing::debug!("Saved engine config to {:?}", path.as_ref());
        Ok(())
    }
}
