//! Settings Storage
//!
//! Handles reading/writing the settings file.
//! Location: ~/.sshdeck on macOS/Linux, %APPDATA%\sshdeck on Windows

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::types::{ManagerSettings, SETTINGS_VERSION};

/// Settings storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },
}

/// Get the configuration directory
pub fn config_dir() -> Result<PathBuf, StorageError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("sshdeck"));
        }
        dirs::home_dir()
            .map(|home| home.join(".sshdeck"))
            .ok_or(StorageError::NoConfigDir)
    }

    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|home| home.join(".sshdeck"))
            .ok_or(StorageError::NoConfigDir)
    }
}

/// Get the settings file path
pub fn settings_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("settings.json"))
}

/// Load settings from disk. A missing file yields defaults.
pub async fn load_settings(path: &Path) -> Result<ManagerSettings, StorageError> {
    match fs::read_to_string(path).await {
        Ok(contents) => {
            let settings = serde_json::from_str::<ManagerSettings>(&contents)?;
            if settings.version > SETTINGS_VERSION {
                return Err(StorageError::VersionTooNew {
                    found: settings.version,
                    supported: SETTINGS_VERSION,
                });
            }
            Ok(settings)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ManagerSettings::default()),
        Err(e) => Err(StorageError::Io(e)),
    }
}

/// Load settings from the default location, never failing
pub async fn load_settings_or_default() -> ManagerSettings {
    let path = match settings_file() {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!("{}; using default settings", e);
            return ManagerSettings::default();
        }
    };

    match load_settings(&path).await {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings from {:?}: {}; using defaults", path, e);
            ManagerSettings::default()
        }
    }
}

/// Save settings to disk
pub async fn save_settings(path: &Path, settings: &ManagerSettings) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    // Write to temp file first, then rename (atomic write)
    let temp_path = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(settings)?;

    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(json.as_bytes()).await?;
    file.sync_all().await?;

    fs::rename(&temp_path, path).await?;

    Ok(())
}
