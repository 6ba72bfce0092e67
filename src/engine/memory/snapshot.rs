//! JSON snapshot persistence for the memory engine
//!
//! The whole engine state is rewritten on every flush:
//!
//! ```text
//! write <file>.tmp → fsync → rename over <file>
//! ```
//!
//! so a crash leaves either the previous or the new snapshot, never a torn
//! one.
//!
//! Row values are stored type-tagged so they load back exactly as written,
//! non-finite numbers included.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::DatabaseState;
use crate::error::{Error, Result};
use crate::model::{Datum, Key};

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    written_at: DateTime<Utc>,
    databases: Vec<SnapshotDatabase>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDatabase {
    name: String,
    version: u64,
    created_at: DateTime<Utc>,
    tables: Vec<SnapshotTable>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotTable {
    name: String,
    rows: Vec<(Key, StoredValue)>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
enum StoredValue {
    Null,
    Boolean(bool),
    Number(#[serde(with = "crate::model::number")] f64),
    String(String),
    Array(Vec<StoredValue>),
    Object(BTreeMap<String, StoredValue>),
}

impl From<&Datum> for StoredValue {
    fn from(datum: &Datum) -> Self {
        match datum {
            Datum::Null => StoredValue::Null,
            Datum::Boolean(b) => StoredValue::Boolean(*b),
            Datum::Number(n) => StoredValue::Number(*n),
            Datum::String(s) => StoredValue::String(s.clone()),
            Datum::Array(items) => StoredValue::Array(items.iter().map(StoredValue::from).collect()),
            Datum::Object(fields) => StoredValue::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), StoredValue::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<StoredValue> for Datum {
    fn from(value: StoredValue) -> Self {
        match value {
            StoredValue::Null => Datum::Null,
            StoredValue::Boolean(b) => Datum::Boolean(b),
            StoredValue::Number(n) => Datum::Number(n),
            StoredValue::String(s) => Datum::String(s),
            StoredValue::Array(items) => Datum::Array(items.into_iter().map(Datum::from).collect()),
            StoredValue::Object(fields) => Datum::Object(
                fields
                    .into_iter()
                    .map(|(name, value)| (name, Datum::from(value)))
                    .collect(),
            ),
        }
    }
}

/// Location of the snapshot file.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    path: PathBuf,
}

impl Snapshot {
    pub(crate) fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the snapshot, or an empty state if there is none yet.
    pub(crate) fn load(&self) -> Result<BTreeMap<String, DatabaseState>> {
        if !self.path.exists() {
            info!(path = ?self.path, "No snapshot found, starting fresh");
            return Ok(BTreeMap::new());
        }

        let file = File::open(&self.path)
            .map_err(|e| Error::Storage(format!("Failed to open snapshot: {}", e)))?;
        let snapshot: SnapshotFile = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::SerializationError(format!("Corrupt snapshot: {}", e)))?;

        let databases: BTreeMap<String, DatabaseState> = snapshot
            .databases
            .into_iter()
            .map(|db| {
                let tables = db
                    .tables
                    .into_iter()
                    .map(|table| {
                        let rows = table
                            .rows
                            .into_iter()
                            .map(|(key, value)| (key, Datum::from(value)))
                            .collect();
                        (table.name, rows)
                    })
                    .collect();
                (
                    db.name,
                    DatabaseState {
                        version: db.version,
                        created_at: db.created_at,
                        tables,
                    },
                )
            })
            .collect();

        info!(
            path = ?self.path,
            databases = databases.len(),
            written_at = %snapshot.written_at,
            "Snapshot recovered"
        );
        Ok(databases)
    }

    /// Atomically replaces the snapshot with `databases`.
    pub(crate) fn write(&self, databases: &BTreeMap<String, DatabaseState>) -> Result<()> {
        let snapshot = SnapshotFile {
            written_at: Utc::now(),
            databases: databases
                .iter()
                .map(|(name, db)| SnapshotDatabase {
                    name: name.clone(),
                    version: db.version,
                    created_at: db.created_at,
                    tables: db
                        .tables
                        .iter()
                        .map(|(table, rows)| SnapshotTable {
                            name: table.clone(),
                            rows: rows
                                .iter()
                                .map(|(key, value)| (key.clone(), StoredValue::from(value)))
                                .collect(),
                        })
                        .collect(),
                })
                .collect(),
        };
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| Error::SerializationError(format!("Failed to encode snapshot: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create data dir: {}", e)))?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| Error::Storage(format!("Failed to create temp snapshot: {}", e)))?;
        file.write_all(&bytes)
            .map_err(|e| Error::Storage(format!("Failed to write snapshot: {}", e)))?;
        file.sync_all()
            .map_err(|e| Error::Storage(format!("Failed to sync snapshot: {}", e)))?;

        std::fs::rename(&temp_path, &self.path)
            .map_err(|e| Error::Storage(format!("Failed to rename snapshot: {}", e)))?;

        debug!(path = ?self.path, bytes = bytes.len(), "Snapshot written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_round_trip() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("tablekv_snapshot_{}", std::process::id()));
        let snapshot = Snapshot::new(dir.join("state.json"));

        let mut rows = BTreeMap::new();
        rows.insert(Key::from("1"), Datum::from("x"));
        rows.insert(Key::from(2), Datum::from(2.5));
        let mut db = DatabaseState::new(3);
        db.tables.insert("t".to_string(), rows);
        let mut databases = BTreeMap::new();
        databases.insert("d".to_string(), db);

        snapshot.write(&databases)?;
        let loaded = snapshot.load()?;

        let db = loaded.get("d").expect("database");
        assert_eq!(db.version, 3);
        assert_eq!(
            db.tables["t"].get(&Key::from("1")),
            Some(&Datum::from("x"))
        );
        assert_eq!(db.tables["t"].len(), 2);

        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[test]
    fn test_non_finite_values_survive() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("tablekv_snapshot_nf_{}", std::process::id()));
        let snapshot = Snapshot::new(dir.join("state.json"));

        let nested = Datum::from(vec![Datum::from(f64::NEG_INFINITY), Datum::from("Infinity")]);
        let mut rows = BTreeMap::new();
        rows.insert(Key::from(f64::INFINITY), Datum::from(f64::INFINITY));
        rows.insert(Key::from("nested"), nested.clone());
        rows.insert(Key::from("nan"), Datum::from(f64::NAN));
        let mut db = DatabaseState::new(2);
        db.tables.insert("t".to_string(), rows);
        let mut databases = BTreeMap::new();
        databases.insert("d".to_string(), db);

        snapshot.write(&databases)?;
        let loaded = snapshot.load()?;
        let rows = &loaded["d"].tables["t"];

        assert_eq!(rows.get(&Key::from(f64::INFINITY)), Some(&Datum::from(f64::INFINITY)));
        // A string that spells a number stays a string
        assert_eq!(rows.get(&Key::from("nested")), Some(&nested));
        assert!(rows
            .get(&Key::from("nan"))
            .and_then(Datum::as_number)
            .is_some_and(f64::is_nan));

        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[test]
    fn test_missing_snapshot_is_empty() -> Result<()> {
        let snapshot = Snapshot::new(std::env::temp_dir().join(format!(
            "tablekv_missing_{}/none.json",
            std::process::id()
        )));
        assert!(snapshot.load()?.is_empty());
        Ok(())
    }
}
