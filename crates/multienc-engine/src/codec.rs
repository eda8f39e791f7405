//! Codec catalog and selection helpers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Default bitrate menu in kbps.
pub const BITRATES_KBPS: [u32; 11] = [16, 24, 32, 48, 64, 96, 128, 160, 192, 256, 320];

/// Codecs selected when nothing has been configured.
pub const DEFAULT_SELECTED_CODECS: [&str; 2] = ["mp3", "opus"];

/// Bitrates selected when nothing has been configured.
pub const DEFAULT_SELECTED_BITRATES: [u32; 3] = [96, 128, 160];

/// Capability probe results keyed by probe key.
pub type SupportMap = BTreeMap<String, bool>;

/// Output format handed to the codec engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatDescriptor {
    /// Container / muxer name (e.g. `mp3`, `webm`, `wav`).
    pub container: String,
    /// Audio encoder name. `None` lets the engine pick the container default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
}

impl FormatDescriptor {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            audio_codec: None,
        }
    }

    pub fn with_audio_codec(mut self, codec: impl Into<String>) -> Self {
        self.audio_codec = Some(codec.into());
        self
    }
}

/// A selectable output codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecOption {
    /// Identity key, also the prefix of every job id built from this codec.
    pub key: String,
    /// Display label.
    pub label: String,
    /// File extension of produced outputs (without the dot).
    pub ext: String,
    /// MIME type of produced outputs.
    pub mime: String,
    /// Whether this codec is compiled once per selected bitrate.
    pub uses_bitrate: bool,
    /// Key queried against the capability probe, if support can vary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_key: Option<String>,
    /// Non-bitrate codecs flagged here pass the source through unchanged.
    #[serde(default)]
    pub pass_through: bool,
    /// Format handed to the codec engine.
    pub format: FormatDescriptor,
}

impl CodecOption {
    /// Whether the support map rules this codec out.
    ///
    /// Codecs without a probe key, or whose key is absent from the map, are
    /// considered supported.
    pub fn is_unsupported(&self, support: &SupportMap) -> bool {
        self.probe_key
            .as_ref()
            .is_some_and(|key| support.get(key) == Some(&false))
    }
}

/// The built-in catalog: lossless WAV, MP3 and Opus (WebM).
pub fn default_catalog() -> Vec<CodecOption> {
    vec![
        CodecOption {
            key: "wav".to_string(),
            label: "Lossless".to_string(),
            ext: "wav".to_string(),
            mime: "audio/wav".to_string(),
            uses_bitrate: false,
            probe_key: None,
            pass_through: true,
            format: FormatDescriptor::new("wav").with_audio_codec("pcm_s16le"),
        },
        CodecOption {
            key: "mp3".to_string(),
            label: "MP3".to_string(),
            ext: "mp3".to_string(),
            mime: "audio/mpeg".to_string(),
            uses_bitrate: true,
            probe_key: Some("mp3".to_string()),
            pass_through: false,
            format: FormatDescriptor::new("mp3").with_audio_codec("libmp3lame"),
        },
        CodecOption {
            key: "opus".to_string(),
            label: "Opus".to_string(),
            ext: "webm".to_string(),
            mime: "audio/webm".to_string(),
            uses_bitrate: true,
            probe_key: Some("opus".to_string()),
            pass_through: false,
            format: FormatDescriptor::new("webm").with_audio_codec("libopus"),
        },
    ]
}

/// Selected codecs in catalog order, non-bitrate codecs first.
///
/// Unknown keys are ignored.
pub fn selected_codec_options<S: AsRef<str>>(
    catalog: &[CodecOption],
    selected: &[S],
) -> Vec<CodecOption> {
    let wanted: BTreeSet<&str> = selected.iter().map(|s| s.as_ref()).collect();
    let mut options: Vec<CodecOption> = catalog
        .iter()
        .filter(|c| wanted.contains(c.key.as_str()))
        .cloned()
        .collect();
    // stable: keeps catalog order inside each group
    options.sort_by_key(|c| c.uses_bitrate);
    options
}

/// Selected codecs that a support map would drop. Advisory only.
pub fn unsupported_codecs(
    selected: &[CodecOption],
    support: Option<&SupportMap>,
) -> Vec<CodecOption> {
    let Some(support) = support else {
        return Vec::new();
    };
    selected
        .iter()
        .filter(|c| c.is_unsupported(support))
        .cloned()
        .collect()
}

/// True when a bitrate codec is selected but no bitrate is.
pub fn needs_bitrate_but_none_selected(selected: &[CodecOption], bitrates: &[u32]) -> bool {
    selected.iter().any(|c| c.uses_bitrate) && bitrates.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_keys_are_unique() {
        let catalog = default_catalog();
        let keys: BTreeSet<_> = catalog.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys.len(), catalog.len());
    }

    #[test]
    fn test_selected_codec_options_puts_lossless_first() {
        let catalog = default_catalog();
        let options = selected_codec_options(&catalog, &["opus", "wav", "flac"]);
        let keys: Vec<_> = options.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["wav", "opus"]);
    }

    #[test]
    fn test_unsupported_codecs() {
        let catalog = default_catalog();
        let mut support = SupportMap::new();
        support.insert("mp3".to_string(), true);
        support.insert("opus".to_string(), false);

        assert!(unsupported_codecs(&catalog, None).is_empty());

        let dropped = unsupported_codecs(&catalog, Some(&support));
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].key, "opus");
    }

    #[test]
    fn test_missing_probe_entry_counts_as_supported() {
        let catalog = default_catalog();
        let support = SupportMap::new();
        assert!(catalog.iter().all(|c| !c.is_unsupported(&support)));
    }

    #[test]
    fn test_needs_bitrate_but_none_selected() {
        let catalog = default_catalog();
        let wav_only = selected_codec_options(&catalog, &["wav"]);
        let with_mp3 = selected_codec_options(&catalog, &["wav", "mp3"]);

        assert!(!needs_bitrate_but_none_selected(&wav_only, &[]));
        assert!(needs_bitrate_but_none_selected(&with_mp3, &[]));
        assert!(!needs_bitrate_but_none_selected(&with_mp3, &[128]));
    }
}
