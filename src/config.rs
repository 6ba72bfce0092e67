//! Engine configuration
//!
//! Read from a TOML file:
//!
//! ```toml
//! data_dir = "data/tablekv"
//! snapshot_file = "tablekv.json"
//! default_durability = "strict"
//! ```
//!
//! Without `data_dir` the engine is volatile.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::engine::{Durability, MemoryEngine, StorageEngine};
use crate::error::{Error, Result};
use crate::storage::Storage;

fn default_snapshot_file() -> String {
    "tablekv.json".to_string()
}

fn default_durability() -> Durability {
    Durability::Strict
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the snapshot; `None` keeps everything in memory
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,

    /// Durability of table handles handed out by [`Storage`]
    #[serde(default = "default_durability")]
    pub default_durability: Durability,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            snapshot_file: default_snapshot_file(),
            default_durability: default_durability(),
        }
    }
}

impl EngineConfig {
    /// Volatile configuration.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Persistent configuration rooted at `data_dir`.
    pub fn persistent<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: Some(data_dir.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.snapshot_file.trim().is_empty() {
            return Err(Error::Config("snapshot_file cannot be empty".to_string()));
        }
        if Path::new(&self.snapshot_file).components().count() != 1 {
            return Err(Error::Config(format!(
                "snapshot_file must be a plain file name, got '{}'",
                self.snapshot_file
            )));
        }
        Ok(())
    }

    /// Full snapshot path, if persistence is configured.
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join(&self.snapshot_file))
    }

    pub fn build_engine(&self) -> Result<Arc<dyn StorageEngine>> {
        self.validate()?;
        let engine = match self.snapshot_path() {
            Some(path) => {
                info!(path = ?path, "Using persistent memory engine");
                MemoryEngine::persistent(path)?
            }
            None => {
                info!("Using volatile memory engine");
                MemoryEngine::new()
            }
        };
        Ok(Arc::new(engine))
    }

    /// Engine plus a facade using the configured durability.
    pub fn build_storage(&self) -> Result<Storage> {
        Ok(Storage::new(self.build_engine()?).with_durability(self.default_durability))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.data_dir.is_none());
        assert_eq!(config.snapshot_file, "tablekv.json");
        assert_eq!(config.default_durability, Durability::Strict);
        assert!(config.snapshot_path().is_none());
    }

    #[test]
    fn test_from_toml() -> Result<()> {
        let config = EngineConfig::from_toml(
            r#"
            data_dir = "/tmp/tablekv"
            default_durability = "relaxed"
            "#,
        )?;
        assert_eq!(
            config.snapshot_path(),
            Some(PathBuf::from("/tmp/tablekv/tablekv.json"))
        );
        assert_eq!(config.default_durability, Durability::Relaxed);
        Ok(())
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            EngineConfig::from_toml("default_durability = \"sometimes\""),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml("snapshot_file = \"a/b.json\""),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_file("/nonexistent/tablekv.toml"),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_build_storage() -> Result<()> {
        let storage = EngineConfig::in_memory().build_storage()?;
        storage.database_set("d").await?.close();
        assert_eq!(storage.database_keys().await?, vec!["d".to_string()]);
        Ok(())
    }
}
