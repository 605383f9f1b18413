//! udsync configuration file parsing (udsync.toml)

use std::path::{Path, PathBuf};

/// Persisted session settings
///
/// The CLI loads these as defaults and writes them back when a session
/// starts, so the next invocation can omit the arguments.
#[derive(Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory tree to track
    pub tracking_path: Option<PathBuf>,

    /// Local UDP port the master listens on for heartbeats
    pub listen_port: Option<u16>,
}

/// Config file name
pub const CONFIG_FILE: &str = "udsync.toml";

impl SyncConfig {
    /// Load config from `dir`.
    ///
    /// Returns default config if udsync.toml doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(dir: &Path) -> color_eyre::Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Write config to `dir`, replacing any existing file.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn store(&self, dir: &Path) -> color_eyre::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(dir.join(CONFIG_FILE), content)?;
        Ok(())
    }
}
