//! Hardwire configuration file (`.HWPDM`) loading.
//!
//! The file is a JSON document produced by the Hardwire configurator. Only
//! three keys matter here:
//!
//! ```json
//! {
//!   "rawSendData": ["line 1\n", "line 2\n"],
//!   "MetaData": { "ConfiguratorVersion": "1.2" },
//!   "Global": { "deviceModelVersion": "4" }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file {0} not found")]
    NotFound(PathBuf),
    #[error("Could not open config file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not read config file: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid config file: missing {0}")]
    MissingKey(&'static str),
    #[error("Invalid {field} in config file: '{value}'")]
    InvalidMetadata { field: &'static str, value: String },
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(rename = "rawSendData")]
    raw_send_data: Option<Vec<String>>,
    #[serde(rename = "MetaData")]
    meta_data: Option<RawMetaData>,
    #[serde(rename = "Global")]
    global: Option<RawGlobal>,
}

#[derive(Deserialize)]
struct RawMetaData {
    #[serde(rename = "ConfiguratorVersion")]
    configurator_version: Option<String>,
}

#[derive(Deserialize)]
struct RawGlobal {
    #[serde(rename = "deviceModelVersion")]
    device_model_version: Option<String>,
}

/// A loaded configuration, ready to be chunked and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationFile {
    /// Configurator version with the dots removed ("1.2" -> "12").
    pub configurator_version: String,
    /// Device model the configuration targets.
    pub device_model_version: String,
    /// Payload lines, sent verbatim.
    pub raw_lines: Vec<String>,
}

impl ConfigurationFile {
    /// Load configuration from a JSON file.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&content)?;
        info!(
            version = %config.configurator_version,
            model = %config.device_model_version,
            lines = config.raw_lines.len(),
            "Loaded config file"
        );
        Ok(config)
    }

    /// Parse configuration from JSON text.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let doc: RawDocument = serde_json::from_str(content)?;

        let raw_lines = doc
            .raw_send_data
            .ok_or(ConfigError::MissingKey("rawSendData"))?;
        let configurator_version = doc
            .meta_data
            .and_then(|m| m.configurator_version)
            .ok_or(ConfigError::MissingKey("MetaData.ConfiguratorVersion"))?
            .replace('.', "");
        let device_model_version = doc
            .global
            .and_then(|g| g.device_model_version)
            .ok_or(ConfigError::MissingKey("Global.deviceModelVersion"))?;

        Ok(Self {
            configurator_version,
            device_model_version,
            raw_lines,
        })
    }

    /// Firmware version and model a device must report to accept this file.
    pub fn compatibility(&self) -> Result<CompatibilityTarget, ConfigError> {
        CompatibilityTarget::from_config(self)
    }
}

/// Numeric compatibility requirements derived from the file metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompatibilityTarget {
    pub firmware_version: u8,
    pub model: u8,
}

impl CompatibilityTarget {
    pub fn from_config(config: &ConfigurationFile) -> Result<Self, ConfigError> {
        Ok(Self {
            firmware_version: parse_u8("ConfiguratorVersion", &config.configurator_version)?,
            model: parse_u8("deviceModelVersion", &config.device_model_version)?,
        })
    }
}

fn parse_u8(field: &'static str, value: &str) -> Result<u8, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidMetadata {
            field,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "rawSendData": ["{\n", "\"outputs\": []\n", "}\n"],
        "MetaData": { "ConfiguratorVersion": "1.2", "Author": "x" },
        "Global": { "deviceModelVersion": "4" }
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = ConfigurationFile::from_json(SAMPLE).unwrap();
        assert_eq!(config.configurator_version, "12");
        assert_eq!(config.device_model_version, "4");
        assert_eq!(config.raw_lines.len(), 3);
        assert_eq!(
            config.compatibility().unwrap(),
            CompatibilityTarget {
                firmware_version: 12,
                model: 4
            }
        );
    }

    #[test]
    fn test_missing_keys() {
        assert!(matches!(
            ConfigurationFile::from_json(r#"{"MetaData":{},"Global":{}}"#),
            Err(ConfigError::MissingKey("rawSendData"))
        ));
        assert!(matches!(
            ConfigurationFile::from_json(r#"{"rawSendData":[],"Global":{"deviceModelVersion":"4"}}"#),
            Err(ConfigError::MissingKey("MetaData.ConfiguratorVersion"))
        ));
        assert!(matches!(
            ConfigurationFile::from_json(r#"{"rawSendData":[],"MetaData":{"ConfiguratorVersion":"1"}}"#),
            Err(ConfigError::MissingKey("Global.deviceModelVersion"))
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            ConfigurationFile::from_json("{ not json"),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn test_invalid_metadata() {
        let config = ConfigurationFile {
            configurator_version: "300".into(),
            device_model_version: "".into(),
            raw_lines: vec![],
        };
        assert!(matches!(
            config.compatibility(),
            Err(ConfigError::InvalidMetadata {
                field: "ConfiguratorVersion",
                ..
            })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = ConfigurationFile::load_from_file(file.path()).unwrap();
        assert_eq!(config.raw_lines[1], "\"outputs\": []\n");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.HWPDM");
        assert!(matches!(
            ConfigurationFile::load_from_file(&path),
            Err(ConfigError::NotFound(p)) if p == path
        ));
    }
}
