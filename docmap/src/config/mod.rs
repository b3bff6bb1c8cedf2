// docmap.yaml - which schema, which driver, how ids and counters work

use crate::driver::IdStrategy;
use crate::error::{DocMapError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Conventional config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "docmap.yaml";

pub const DEFAULT_SEQUENCE: &str = "sequence";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to schema.yaml, relative to the config file
    pub schema: PathBuf,
    #[serde(default)]
    pub driver: DriverKind,
    /// SQLite database file, relative to the config file
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub id_strategy: IdStrategy,
    /// Counter scope for auto-increment fields that do not name one
    #[serde(default = "default_sequence")]
    pub sequence: String,
    #[serde(skip)]
    base_dir: PathBuf,
}

fn default_sequence() -> String {
    DEFAULT_SEQUENCE.to_string()
}

impl Config {
    /// A memory-backed configuration for the given schema file.
    pub fn new(schema: impl Into<PathBuf>) -> Self {
        Config {
            schema: schema.into(),
            driver: DriverKind::Memory,
            path: None,
            id_strategy: IdStrategy::default(),
            sequence: default_sequence(),
            base_dir: PathBuf::new(),
        }
    }

    /// Read a config file. Relative paths inside it resolve against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DocMapError::Config(format!("Cannot read {}: {e}", path.display()))
        })?;
        let config = Self::parse_str(&content)?;
        Ok(config.with_base_dir(path.parent().unwrap_or(Path::new(""))))
    }

    pub fn parse_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        if config.sequence.trim().is_empty() {
            return Err(DocMapError::Config("sequence cannot be empty".into()));
        }
        Ok(config)
    }

    pub fn with_base_dir(mut self, dir: &Path) -> Self {
        self.base_dir = dir.to_path_buf();
        self
    }

    pub fn with_sqlite(mut self, path: impl Into<PathBuf>) -> Self {
        self.driver = DriverKind::Sqlite;
        self.path = Some(path.into());
        self
    }

    pub fn schema_path(&self) -> PathBuf {
        self.resolve(&self.schema)
    }

    /// The SQLite file; required when the driver is `sqlite`.
    pub fn database_path(&self) -> Result<PathBuf> {
        self.path
            .as_deref()
            .map(|path| self.resolve(path))
            .ok_or_else(|| DocMapError::Config("the sqlite driver needs a 'path'".into()))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::parse_str("schema: schema.yaml").unwrap();
        assert_eq!(config.driver, DriverKind::Memory);
        assert_eq!(config.id_strategy, IdStrategy::Ulid);
        assert_eq!(config.sequence, "sequence");
        assert!(config.database_path().is_err());
    }

    #[test]
    fn test_full_config() {
        let yaml = "
schema: schema.yaml
driver: sqlite
path: data/app.db
id_strategy: uuid
sequence: counters
";
        let config = Config::parse_str(yaml).unwrap();
        assert_eq!(config.driver, DriverKind::Sqlite);
        assert_eq!(config.id_strategy, IdStrategy::Uuid);
        assert_eq!(config.sequence, "counters");
        assert_eq!(config.database_path().unwrap(), PathBuf::from("data/app.db"));
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        std::fs::write(&path, "schema: schema.yaml\ndriver: sqlite\npath: app.db\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.schema_path(), tmp.path().join("schema.yaml"));
        assert_eq!(config.database_path().unwrap(), tmp.path().join("app.db"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::parse_str("schema: s.yaml\ndriver: mongo").is_err());
        assert!(Config::parse_str("schema: s.yaml\nsequence: ''").is_err());
        assert!(Config::load(Path::new("/nonexistent/docmap.yaml")).is_err());
    }
}
