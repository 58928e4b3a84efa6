//! Engine configuration.
//!
//! Loaded with the following priority: explicit file passed by the caller,
//! `$XDG_CONFIG_HOME/pairview/config.toml`, built-in defaults. Every field
//! has a default so a missing or partial file is never an error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Tunables and directories for one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of entries in the diff cache.
    pub cache_max_entries: usize,
    /// Maximum aggregate bytes held by the diff cache.
    pub cache_max_bytes: usize,
    /// Inputs larger than this many bytes get a summarized diff.
    pub large_diff_threshold: usize,
    /// Content below this many characters is always returned in full by
    /// the lazy loader; above it, previews unless forced.
    pub large_content_threshold: usize,
    /// Batch size for chunked loading.
    pub chunk_size: usize,
    /// Seconds between background cache sweeps.
    pub sweep_interval_secs: u64,
    /// Directory holding session snapshots and locks.
    pub sessions_dir: PathBuf,
    /// Directory the report sink writes into.
    pub reports_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pairview");
        Self {
            cache_max_entries: 1_000,
            cache_max_bytes: 100 * 1024 * 1024,
            large_diff_threshold: 100_000,
            large_content_threshold: 10_000,
            chunk_size: 100,
            sweep_interval_secs: 30,
            sessions_dir: data_dir.join("sessions"),
            reports_dir: PathBuf::from("reports"),
        }
    }
}

impl EngineConfig {
    /// Loads from the default config path, falling back to defaults when
    /// the file is absent.
    pub fn load() -> std::io::Result<Self> {
        match Self::default_config_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Loads from a specific TOML file. Unknown keys are ignored; missing
    /// keys take their defaults.
    pub fn load_from_file(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("config parse error in {}: {e}", path.display()),
            )
        })
    }

    /// `$XDG_CONFIG_HOME/pairview/config.toml` (or the platform
    /// equivalent); `None` when no config directory can be determined.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("pairview").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "cache_max_entries = 7\n").unwrap();

        let config = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(config.cache_max_entries, 7);
        assert_eq!(config.large_diff_threshold, EngineConfig::default().large_diff_threshold);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "cache_max_entries = \"many\"\n").unwrap();
        assert!(EngineConfig::load_from_file(&path).is_err());
    }
}
