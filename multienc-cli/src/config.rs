//! On-disk CLI configuration (TOML).

use std::path::{Path, PathBuf};

use multienc_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, Result};

const APP_DIR: &str = "multienc";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory outputs are written to when `--out-dir` is not given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_dir: Option<PathBuf>,

    pub engine: EngineConfig,
}

impl AppConfig {
    /// `<config dir>/multienc/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
            .ok_or_else(|| AppError::Config("no user configuration directory".to_string()))
    }

    /// Load from `path` (or the default path). A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        let mut config = if path.exists() {
            debug!(path = %path.display(), "Loading configuration");
            let raw = std::fs::read_to_string(&path)?;
            toml::from_str::<Self>(&raw)?
        } else {
            Self::default()
        };

        config.fill_cache_dir();
        config.engine.validate()?;
        Ok(config)
    }

    /// Overwrite the configuration file with defaults.
    pub fn reset(path: Option<&Path>) -> Result<()> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, Self::default().show()?)?;
        Ok(())
    }

    pub fn show(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Persist results under the user cache directory unless configured otherwise.
    fn fill_cache_dir(&mut self) {
        if self.engine.cache.dir.is_none() {
            self.engine.cache.dir = dirs::cache_dir().map(|dir| dir.join(APP_DIR));
        }
    }

    pub fn out_dir(&self, cli: Option<PathBuf>) -> PathBuf {
        cli.or_else(|| self.out_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
