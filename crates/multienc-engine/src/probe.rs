//! Capability probing.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::Result;
use crate::codec::{CodecOption, SupportMap};

/// Answers whether the environment can encode a given probe key.
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    async fn probe(&self, key: &str) -> Result<bool>;

    /// Try to enable an alternate encoder for a key the native probe rejected.
    ///
    /// Returns `Ok(true)` when the key is usable afterwards.
    async fn fallback(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Query every distinct probe key of `catalog` once.
///
/// A probe error counts as unsupported. Keys that come back unsupported get
/// one fallback attempt.
pub async fn probe_support(probe: &dyn CapabilityProbe, catalog: &[CodecOption]) -> SupportMap {
    let keys: BTreeSet<&str> = catalog
        .iter()
        .filter_map(|c| c.probe_key.as_deref())
        .collect();

    let mut support = SupportMap::new();
    for key in keys {
        let mut supported = match probe.probe(key).await {
            Ok(supported) => supported,
            Err(e) => {
                warn!(key, error = %e, "Capability probe failed; treating as unsupported");
                false
            }
        };

        if !supported {
            supported = match probe.fallback(key).await {
                Ok(true) => {
                    info!(key, "Enabled fallback encoder");
                    true
                }
                Ok(false) => false,
                Err(e) => {
                    debug!(key, error = %e, "Fallback encoder unavailable");
                    false
                }
            };
        }

        support.insert(key.to_string(), supported);
    }
    support
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::codec::default_catalog;
    use parking_lot::Mutex;

    struct ScriptedProbe {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CapabilityProbe for ScriptedProbe {
        async fn probe(&self, key: &str) -> Result<bool> {
            self.calls.lock().push(key.to_string());
            match key {
                "mp3" => Ok(false),
                "opus" => Err(Error::probe(key, "encoder list unavailable")),
                _ => Ok(true),
            }
        }

        async fn fallback(&self, key: &str) -> Result<bool> {
            Ok(key == "mp3")
        }
    }

    #[tokio::test]
    async fn test_probe_support() {
        let probe = ScriptedProbe {
            calls: Mutex::new(Vec::new()),
        };
        let support = probe_support(&probe, &default_catalog()).await;

        assert_eq!(support.get("mp3"), Some(&true));
        assert_eq!(support.get("opus"), Some(&false));
        assert_eq!(support.len(), 2);
        assert_eq!(*probe.calls.lock(), vec!["mp3", "opus"]);
    }
}
