//! YAML settings I/O
//!
//! Loading never fails: a missing or unreadable file yields defaults so the
//! audio pipeline can always start. Saving goes through a sibling temp file
//! and a rename, so a crash mid-write leaves the previous file intact.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Load a settings file, falling back to `T::default()`
///
/// # Example
///
/// ```ignore
/// let settings: AudioSettings = load_config(&default_config_path("audio.yaml"));
/// ```
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("No settings at {:?}, using defaults", path);
        return T::default();
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            log::warn!("Failed to read settings {:?}: {}, using defaults", path, e);
            return T::default();
        }
    };

    match serde_yaml::from_str::<T>(&contents) {
        Ok(config) => {
            log::info!("Loaded settings from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("Failed to parse settings {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Save a settings file, creating parent directories as needed
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create settings directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize settings to YAML")?;

    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).with_context(|| format!("Failed to write {:?}", tmp))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move settings into place at {:?}", path))?;

    log::info!("Saved settings to {:?}", path);
    Ok(())
}
