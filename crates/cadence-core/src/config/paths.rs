//! Standard locations for cadence settings files

use std::path::PathBuf;

/// Directory holding cadence settings
///
/// Returns: `~/.config/cadence` (platform equivalent elsewhere)
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cadence")
}

/// Path of a settings file inside [`config_dir`]
pub fn default_config_path(filename: &str) -> PathBuf {
    config_dir().join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_ends_with_cadence() {
        assert!(config_dir().ends_with("cadence"));
    }

    #[test]
    fn test_config_path_includes_filename() {
        let path = default_config_path("audio.yaml");
        assert!(path.ends_with("cadence/audio.yaml"));
    }
}
