use std::path::{Path, PathBuf};

use mailprint_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const DEFAULT_CONFIG_FILE: &str = "config.yml";

/// Reads `AppConfig` from YAML or TOML, picking the format by extension.
pub struct ConfigLoader;

impl ConfigLoader {
    /// `~/.mailprint`, falling back to the current directory when no home
    /// directory can be determined.
    pub fn default_config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mailprint")
    }

    /// Load from an explicit path. The file must exist.
    pub fn load(path: &Path) -> Result<AppConfig> {
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "config file {}",
                path.display()
            )));
        }
        let config = Self::parse_file(path)?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `config.yml` from the default config directory, or return the
    /// defaults when it does not exist.
    pub fn load_default() -> Result<AppConfig> {
        let path = Self::default_config_dir().join(DEFAULT_CONFIG_FILE);
        if !path.exists() {
            debug!("no config at {}, using defaults", path.display());
            return Ok(AppConfig::default());
        }
        Self::load(&path)
    }

    fn parse_file(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("TOML parse error: {e}"))),
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }
}
