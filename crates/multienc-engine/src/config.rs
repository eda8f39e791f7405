//! Engine configuration.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::codec::{
    BITRATES_KBPS, CodecOption, DEFAULT_SELECTED_BITRATES, DEFAULT_SELECTED_CODECS,
    default_catalog, selected_codec_options,
};
use crate::pipeline::default_concurrency;
use crate::{Error, Result};

/// Result cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory of the file-backed cache. `None` keeps the cache in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Also read and write the legacy base64 key-value tier.
    pub legacy_tier: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            legacy_tier: true,
        }
    }
}

/// Where the FFmpeg binaries live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    /// `ffmpeg` executable, resolved through `PATH` when relative.
    pub ffmpeg_path: PathBuf,

    /// Scratch directory for source and output files. Defaults to the system temp dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            temp_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum concurrent execution units.
    pub concurrency: usize,

    /// Codecs available for selection.
    pub catalog: Vec<CodecOption>,

    /// Bitrate menu offered for bitrate codecs, in kbps.
    pub bitrates_kbps: Vec<u32>,

    /// Codec keys selected when the caller does not choose.
    pub selected_codecs: Vec<String>,

    /// Bitrates selected when the caller does not choose.
    pub selected_bitrates: Vec<u32>,

    pub cache: CacheConfig,

    pub ffmpeg: FfmpegConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            catalog: default_catalog(),
            bitrates_kbps: BITRATES_KBPS.to_vec(),
            selected_codecs: DEFAULT_SELECTED_CODECS.iter().map(|s| s.to_string()).collect(),
            selected_bitrates: DEFAULT_SELECTED_BITRATES.to_vec(),
            cache: CacheConfig::default(),
            ffmpeg: FfmpegConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::config("concurrency must be at least 1"));
        }

        let mut keys = HashSet::new();
        for codec in &self.catalog {
            if codec.key.is_empty() {
                return Err(Error::config("codec key must not be empty"));
            }
            if !keys.insert(codec.key.as_str()) {
                return Err(Error::config(format!("duplicate codec key '{}'", codec.key)));
            }
            if codec.pass_through && codec.uses_bitrate {
                return Err(Error::config(format!(
                    "codec '{}' cannot both pass the source through and use a bitrate",
                    codec.key
                )));
            }
        }

        if self.bitrates_kbps.contains(&0) || self.selected_bitrates.contains(&0) {
            return Err(Error::config("bitrates must be greater than zero"));
        }

        if let Some(unknown) = self
            .selected_codecs
            .iter()
            .find(|key| !keys.contains(key.as_str()))
        {
            return Err(Error::config(format!("selected codec '{unknown}' is not in the catalog")));
        }

        Ok(())
    }

    /// Catalog entries for the configured default selection.
    pub fn selected_options(&self) -> Vec<CodecOption> {
        selected_codec_options(&self.catalog, &self.selected_codecs)
    }

    pub fn codec(&self, key: &str) -> Option<&CodecOption> {
        self.catalog.iter().find(|c| c.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert!(config.concurrency >= 1);
        assert!(config.cache.legacy_tier);
        assert_eq!(config.selected_options().len(), 2);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"concurrency": 2, "cache": {"legacy_tier": false}}"#).unwrap();
        assert_eq!(config.concurrency, 2);
        assert!(!config.cache.legacy_tier);
        assert_eq!(config.catalog, default_catalog());
        assert_eq!(config.ffmpeg.ffmpeg_path, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = EngineConfig::default();
        config.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.selected_codecs.push("flac".to_string());
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let mut config = EngineConfig::default();
        let dup = config.catalog[0].clone();
        config.catalog.push(dup);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.selected_bitrates = vec![0];
        assert!(config.validate().is_err());
    }
}
