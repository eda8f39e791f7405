//! Capability probe backed by `ffmpeg -encoders`.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::command::tokio_command;
use crate::probe::CapabilityProbe;
use crate::{Error, Result};

/// Encoders tried for a probe key, preferred first.
fn candidates(key: &str) -> &'static [&'static str] {
    match key {
        "mp3" => &["libmp3lame", "libshine", "mp3_mf"],
        "opus" => &["libopus", "opus"],
        "aac" => &["aac", "libfdk_aac"],
        "flac" => &["flac"],
        "vorbis" => &["libvorbis", "vorbis"],
        _ => &[],
    }
}

/// Extract encoder names from `ffmpeg -encoders` output.
///
/// Entries follow the `------` separator as `<flags> <name> <description>`.
pub fn parse_encoder_list(output: &str) -> HashSet<String> {
    output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let flags = fields.next()?;
            let name = fields.next()?;
            (flags.len() == 6).then(|| name.to_string())
        })
        .collect()
}

/// Queries the encoder list once per session.
pub struct FfmpegProbe {
    ffmpeg_path: PathBuf,
    encoders: OnceCell<std::result::Result<HashSet<String>, String>>,
    /// Primary encoder to the alternate registered by `fallback`.
    overrides: DashMap<String, String>,
}

impl FfmpegProbe {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            encoders: OnceCell::new(),
            overrides: DashMap::new(),
        }
    }

    /// Probe from an already captured encoder list.
    pub fn from_encoders(encoders: HashSet<String>) -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            encoders: OnceCell::new_with(Some(Ok(encoders))),
            overrides: DashMap::new(),
        }
    }

    /// Alternates registered so far, keyed by the primary encoder they replace.
    pub fn encoder_overrides(&self) -> HashMap<String, String> {
        self.overrides
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    async fn encoders(&self, key: &str) -> Result<&HashSet<String>> {
        let loaded = self
            .encoders
            .get_or_init(|| self.load())
            .await;
        loaded.as_ref().map_err(|reason| Error::probe(key, reason.clone()))
    }

    /// Encoder names reported by `ffmpeg -encoders`, or why they could not be read.
    async fn load(&self) -> std::result::Result<HashSet<String>, String> {
        let output = tokio_command(&self.ffmpeg_path)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| format!("failed to run ffmpeg: {e}"))?;
        if !output.status.success() {
            return Err(format!("ffmpeg -encoders exited with {}", output.status));
        }

        let encoders = parse_encoder_list(&String::from_utf8_lossy(&output.stdout));
        info!(count = encoders.len(), "Loaded ffmpeg encoder list");
        Ok(encoders)
    }
}

#[async_trait]
impl CapabilityProbe for FfmpegProbe {
    async fn probe(&self, key: &str) -> Result<bool> {
        let Some(primary) = candidates(key).first() else {
            return Ok(false);
        };
        Ok(self.encoders(key).await?.contains(*primary))
    }

    async fn fallback(&self, key: &str) -> Result<bool> {
        let all = candidates(key);
        let Some((primary, alternates)) = all.split_first() else {
            return Ok(false);
        };
        let encoders = self.encoders(key).await?;

        match alternates.iter().find(|name| encoders.contains(**name)) {
            Some(alternate) => {
                debug!(key, primary, alternate, "Registering alternate encoder");
                self.overrides
                    .insert(primary.to_string(), alternate.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::default_catalog;
    use crate::probe::probe_support;

    const SAMPLE: &str = "\
Encoders:
 V..... = Video
 A..... = Audio
 ------
 A....D aac                  AAC (Advanced Audio Coding)
 A....D libshine             libshine MP3 (MPEG audio layer 3)
 A..X.D opus                 Opus
 A....D pcm_s16le            PCM signed 16-bit little-endian
";

    #[test]
    fn test_parse_encoder_list() {
        let encoders = parse_encoder_list(SAMPLE);
        assert!(encoders.contains("libshine"));
        assert!(encoders.contains("opus"));
        assert!(encoders.contains("pcm_s16le"));
        assert!(!encoders.contains("="));
        assert_eq!(encoders.len(), 4);
    }

    #[tokio::test]
    async fn test_fallback_registers_alternates() {
        let probe = FfmpegProbe::from_encoders(parse_encoder_list(SAMPLE));

        assert!(!probe.probe("mp3").await.unwrap());
        let support = probe_support(&probe, &default_catalog()).await;

        assert_eq!(support.get("mp3"), Some(&true));
        assert_eq!(support.get("opus"), Some(&true));
        let overrides = probe.encoder_overrides();
        assert_eq!(overrides.get("libmp3lame").map(String::as_str), Some("libshine"));
        assert_eq!(overrides.get("libopus").map(String::as_str), Some("opus"));
    }

    #[tokio::test]
    async fn test_unknown_key_is_unsupported() {
        let probe = FfmpegProbe::from_encoders(HashSet::new());
        assert!(!probe.probe("speex").await.unwrap());
        assert!(!probe.fallback("speex").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_probe_error() {
        let probe = FfmpegProbe::new("/nonexistent/ffmpeg-multienc");
        match probe.probe("mp3").await {
            Err(Error::Probe { key, reason }) => {
                assert_eq!(key, "mp3");
                assert!(reason.starts_with("failed to run ffmpeg"), "{reason}");
            }
            other => panic!("expected a probe error, got {other:?}"),
        }
        // the failed load is cached and reported against the next key
        assert!(matches!(
            probe.fallback("opus").await,
            Err(Error::Probe { key, .. }) if key == "opus"
        ));
    }
}
