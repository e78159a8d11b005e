//! Reader configuration

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{HfsError, Result};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub cache: CacheConfig,
    /// Sector size used for `drAlBlSt` and partition-relative offsets.
    pub physical_block_size: u32,
    /// Upper bound on logical partitions followed in an EBR chain.
    pub max_logical_partitions: usize,
    pub max_apm_entries: u32,
    /// Also look for a GPT header at byte 0 of a partition stream that
    /// lost its protective MBR sector.
    pub probe_gpt_hole: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub block_size: usize,
    pub block_count: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_size: 256 * 1024,
            block_count: 64,
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            physical_block_size: 512,
            max_logical_partitions: 64,
            max_apm_entries: 128,
            probe_gpt_hole: true,
        }
    }
}

impl ReaderConfig {
    /// Load configuration from the first readable `hfs-reader.json` in the
    /// current directory or next to the executable, falling back to defaults.
    pub fn load() -> Self {
        if let Ok(config) = Self::load_from_path("hfs-reader.json") {
            return config;
        }

        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let config_path = exe_dir.join("hfs-reader.json");
                if let Ok(config) = Self::load_from_path(&config_path) {
                    return config;
                }
            }
        }

        Self::default()
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = fs::read_to_string(&path)
            .map_err(|e| HfsError::Config(format!("{}: {e}", path.display())))?;
        let config: ReaderConfig = serde_json::from_str(&content)
            .map_err(|e| HfsError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).map_err(|e| HfsError::Config(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.block_size == 0 || self.cache.block_count == 0 {
            return Err(HfsError::Config(
                "cache block size and block count must be non-zero".into(),
            ));
        }
        if self.physical_block_size == 0 || self.physical_block_size % 512 != 0 {
            return Err(HfsError::Config(format!(
                "physical block size {} is not a multiple of 512",
                self.physical_block_size
            )));
        }
        if self.max_apm_entries == 0 {
            return Err(HfsError::Config("max_apm_entries must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = ReaderConfig::default();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.block_size, 262_144);
        assert_eq!(config.cache.block_count, 64);
        assert_eq!(config.physical_block_size, 512);
        assert_eq!(config.max_logical_partitions, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ReaderConfig =
            serde_json::from_str(r#"{"cache": {"enabled": false}}"#).unwrap();
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.block_count, 64);
        assert_eq!(config.max_apm_entries, 128);
    }

    #[test]
    fn test_load_from_path_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hfs-reader.json");
        let mut config = ReaderConfig::default();
        config.cache.block_count = 8;
        config.probe_gpt_hole = false;
        config.save(&path).unwrap();

        let loaded = ReaderConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_rejects_zero_cache_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"cache": {"block_size": 0}}"#).unwrap();
        let err = ReaderConfig::load_from_path(&path).unwrap_err();
        assert!(matches!(err, HfsError::Config(_)));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = ReaderConfig::load_from_path("/nonexistent/hfs-reader.json").unwrap_err();
        assert!(matches!(err, HfsError::Config(_)));
    }
}
