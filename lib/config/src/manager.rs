use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Errors from loading/saving a TOML-backed config file, split between I/O
/// failure and (de)serialization failure so callers can tell a missing file
/// apart from a corrupt one.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] toml::ser::Error),
}

/// A generic TOML document backing a single config file on disk.
#[derive(Debug, Clone, Default)]
pub struct ConfigManager {
    table: toml::value::Table,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let value: toml::Value = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        let table = match value {
            toml::Value::Table(t) => t,
            _ => toml::value::Table::new(),
        };
        Ok(Self { table })
    }

    pub fn save_file(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(&toml::Value::Table(self.table.clone()))
            .map_err(ConfigError::Serialize)?;
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        std::fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Reads `section.key` (empty `section` means top level), returning
    /// `default` if missing or of the wrong shape.
    pub fn get_value<T: DeserializeOwned + Clone>(&self, section: &str, key: &str, default: T) -> T {
        let table = if section.is_empty() {
            Some(&self.table)
        } else {
            self.table.get(section).and_then(|v| v.as_table())
        };
        table
            .and_then(|t| t.get(key))
            .and_then(|v| v.clone().try_into().ok())
            .unwrap_or(default)
    }

    pub fn set_value<T: Serialize>(&mut self, section: &str, key: &str, value: T) {
        let value = toml::Value::try_from(value).expect("value must be TOML-representable");
        if section.is_empty() {
            self.table.insert(key.to_string(), value);
        } else {
            let entry = self
                .table
                .entry(section.to_string())
                .or_insert_with(|| toml::Value::Table(toml::value::Table::new()));
            if let toml::Value::Table(t) = entry {
                t.insert(key.to_string(), value);
            }
        }
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.table.get(section).is_some_and(|v| v.is_table())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");

        let mut cfg = ConfigManager::new();
        cfg.set_value("", "is_release_build", true);
        cfg.set_value("hlsl", "vs", "vs_6_0".to_string());
        cfg.save_file(&path).unwrap();

        let loaded = ConfigManager::load_file(&path).unwrap();
        assert!(loaded.get_value("", "is_release_build", false));
        assert_eq!(
            loaded.get_value("hlsl", "vs", String::new()),
            "vs_6_0".to_string()
        );
        assert!(loaded.has_section("hlsl"));
    }

    #[test]
    fn missing_key_returns_default() {
        let cfg = ConfigManager::new();
        assert_eq!(cfg.get_value("", "nope", 42u32), 42);
    }
}
