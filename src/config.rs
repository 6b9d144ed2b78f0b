//! Cache configuration, loadable from code or from a `[cache]` TOML table.

use std::fs::read_to_string;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Tunables for the two-tier [`crate::cache::LayeredCache`].
///
/// Field names mirror the original cocoa-side config object this crate's
/// design is descended from, just spelled in `snake_case`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct CacheConfig {
    /// Pre-rasterize images once decoded so that presenting them later does
    /// no further CPU-side decode work.
    pub should_decompress_images: bool,
    /// Apply a "do not back up" hint to files written to disk.
    pub should_disable_cloud_backup: bool,
    /// Whether decoded images are retained in the memory cache at all.
    pub should_cache_images_in_memory: bool,
    /// Max age, in seconds, before an expiration pass deletes a disk entry.
    pub max_cache_age_secs: u64,
    /// Max total disk cache size in bytes. `0` means unbounded.
    pub max_cache_size_bytes: u64,
    /// Max total pixel count across all memory-cached images.
    pub max_memory_cost: u64,
    /// Max number of entries in the memory cache.
    pub max_memory_count_limit: u32,
}

/// One week, matching the default used by the system this design descends from.
const DEFAULT_MAX_CACHE_AGE_SECS: u64 = 7 * 24 * 60 * 60;

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            should_decompress_images: true,
            should_disable_cloud_backup: true,
            should_cache_images_in_memory: true,
            max_cache_age_secs: DEFAULT_MAX_CACHE_AGE_SECS,
            max_cache_size_bytes: 0,
            max_memory_cost: 100_000_000,
            max_memory_count_limit: 0,
        }
    }
}

impl CacheConfig {
    pub fn max_cache_age(&self) -> Duration {
        Duration::from_secs(self.max_cache_age_secs)
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at '{}'", path.display()))?;
        Ok(toml::from_str(&content)?)
    }

    pub fn load_from_system(namespace: &str) -> anyhow::Result<Self> {
        let config_dir = dirs::config_dir().context("Failed to find the configuration directory")?;
        let config_path = config_dir.join(namespace).join("cache.toml");
        if !config_path.is_file() {
            return Ok(Self::default());
        }
        Self::load_from_file(&config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_toml_round_trip() {
        let config = CacheConfig::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed: CacheConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, config);

        // An empty table should also fall back to every field's default
        let from_empty: CacheConfig = toml::from_str("").unwrap();
        assert_eq!(from_empty, config);
    }

    #[test]
    fn partial_table_only_overrides_named_fields() {
        let parsed: CacheConfig = toml::from_str(
            r#"
            max-cache-size-bytes = 104857600
            should-cache-images-in-memory = false
            "#,
        )
        .unwrap();
        assert_eq!(parsed.max_cache_size_bytes, 104_857_600);
        assert!(!parsed.should_cache_images_in_memory);
        assert_eq!(parsed.max_cache_age_secs, DEFAULT_MAX_CACHE_AGE_SECS);
    }
}
