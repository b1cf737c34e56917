use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the optional settings file looked up in the working directory.
pub(crate) const SETTINGS_NAME: &str = "triage_shipper.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parsing error in {}: {source}", .path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Paths {
    /// Directory holding one taxonomy definition per source system.
    pub taxonomy_directory: PathBuf,
    /// Shipper installation; discovered from the working directory when unset.
    pub shipper_directory: Option<PathBuf>,
    pub log_file: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            taxonomy_directory: PathBuf::from("./config"),
            shipper_directory: None,
            log_file: PathBuf::from("triage_shipper.log"),
        }
    }
}

/// Layout of the shipper installation and how its module settings are addressed.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ShipperSettings {
    pub binary: String,
    pub config_file: String,
    pub modules_directory: String,
    pub data_directory: String,
    /// Module setting that receives the discovered path list.
    pub paths_setting: String,
    /// Name fragment used to find the shipper directory in the working directory.
    pub discovery_hint: String,
}

impl Default for ShipperSettings {
    fn default() -> Self {
        Self {
            binary: "filebeat".to_string(),
            config_file: "filebeat.yml".to_string(),
            modules_directory: "modules.d".to_string(),
            data_directory: "data".to_string(),
            paths_setting: "var.paths".to_string(),
            discovery_hint: "filebeat".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BackendSettings {
    pub request_timeout_secs: u64,
    pub retry_attempts: usize,
    pub retry_backoff_ms: u64,
    pub total_fields_limit: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            retry_attempts: 3,
            retry_backoff_ms: 1000,
            total_fields_limit: 100_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ReconcileSettings {
    /// Seconds to wait after the shipper exits before counting again.
    pub settle_secs: u64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self { settle_secs: 5 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Logging {
    pub log_level: String,
    pub log_to_file: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub paths: Paths,
    pub shipper: ShipperSettings,
    pub backend: BackendSettings,
    pub reconcile: ReconcileSettings,
    pub logging: Logging,
}

impl AppConfig {
    /// Loads settings from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join(SETTINGS_NAME)).unwrap();
        assert_eq!(config.reconcile.settle_secs, 5);
        assert_eq!(config.backend.total_fields_limit, 100_000);
        assert_eq!(config.shipper.paths_setting, "var.paths");
        assert_eq!(config.paths.taxonomy_directory, PathBuf::from("./config"));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_NAME);
        write(
            &path,
            "[paths]\nshipper_directory = \"/opt/filebeat\"\n\n[reconcile]\nsettle_secs = 30\n",
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.paths.shipper_directory, Some(PathBuf::from("/opt/filebeat")));
        assert_eq!(config.reconcile.settle_secs, 30);
        assert_eq!(config.backend.retry_attempts, 3);
        assert_eq!(config.shipper.binary, "filebeat");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_NAME);
        write(&path, "[reconcile]\nsettle_secs = \"soon\"\n").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Toml { .. })));
    }
}
