//! Job descriptors and the selection-to-job compiler.

use std::borrow::Borrow;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{CodecOption, FormatDescriptor, SupportMap};

/// Suffix used for jobs of codecs without a bitrate.
pub const LOSSLESS_SUFFIX: &str = "lossless";

/// Deterministic job identity: `<codec>-<kbps>` or `<codec>-lossless`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn for_codec(codec_key: &str, bitrate_kbps: Option<u32>) -> Self {
        match bitrate_kbps {
            Some(kbps) => Self(format!("{codec_key}-{kbps}")),
            None => Self(format!("{codec_key}-{LOSSLESS_SUFFIX}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for JobId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One desired output. Immutable once compiled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub codec_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate_kbps: Option<u32>,
    pub ext: String,
    pub mime: String,
    pub label: String,
    pub format: FormatDescriptor,
    /// Skip the codec engine and hand back the source bytes unchanged.
    #[serde(default)]
    pub copy_source: bool,
}

impl Job {
    fn lossless(codec: &CodecOption) -> Self {
        Self {
            id: JobId::for_codec(&codec.key, None),
            codec_key: codec.key.clone(),
            bitrate_kbps: None,
            ext: codec.ext.clone(),
            mime: codec.mime.clone(),
            label: codec.label.clone(),
            format: codec.format.clone(),
            copy_source: codec.pass_through,
        }
    }

    fn at_bitrate(codec: &CodecOption, kbps: u32) -> Self {
        Self {
            id: JobId::for_codec(&codec.key, Some(kbps)),
            codec_key: codec.key.clone(),
            bitrate_kbps: Some(kbps),
            ext: codec.ext.clone(),
            mime: codec.mime.clone(),
            label: format!("{} {} kbps", codec.label, kbps),
            format: codec.format.clone(),
            copy_source: false,
        }
    }

    /// Bitrate in bits per second, as the codec engine expects it.
    pub fn bitrate_bps(&self) -> Option<u32> {
        self.bitrate_kbps.map(|kbps| kbps.saturating_mul(1000))
    }
}

/// Compile selections into an ordered job list.
///
/// Non-bitrate jobs come first in the order the options were given, followed
/// by bitrate jobs sorted by ascending bitrate with the codec key as
/// tie-break. Codecs the support map marks unsupported are dropped. The
/// function is pure: the same inputs always give the same list.
pub fn compile_jobs(
    options: &[CodecOption],
    bitrates_kbps: &[u32],
    support: Option<&SupportMap>,
) -> Vec<Job> {
    let bitrates: BTreeSet<u32> = bitrates_kbps.iter().copied().collect();
    let mut seen: HashSet<JobId> = HashSet::new();
    let mut lossless = Vec::new();
    let mut lossy = Vec::new();

    for codec in options {
        if support.is_some_and(|s| codec.is_unsupported(s)) {
            continue;
        }
        if codec.uses_bitrate {
            for &kbps in &bitrates {
                let job = Job::at_bitrate(codec, kbps);
                if seen.insert(job.id.clone()) {
                    lossy.push(job);
                }
            }
        } else {
            let job = Job::lossless(codec);
            if seen.insert(job.id.clone()) {
                lossless.push(job);
            }
        }
    }

    lossy.sort_by(|a, b| {
        a.bitrate_kbps
            .cmp(&b.bitrate_kbps)
            .then_with(|| a.codec_key.cmp(&b.codec_key))
    });

    lossless.extend(lossy);
    lossless
}
