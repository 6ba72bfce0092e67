//! Storage engine capability
//!
//! # Architecture
//!
//! The engine is the external key-value store the rest of the crate is
//! written against. It is organised the same way the storage layer names
//! things:
//!
//! ```text
//! StorageEngine (one per origin)
//!   └─→ Connection (open handle on a named, versioned database)
//!        └─→ ObjectStore (transaction-scoped handle on one table)
//!             └─→ Cursor (forward position over the table's rows)
//! ```
//!
//! Every data operation returns a [`Request`] that reports completion as an
//! event. Only table-name listing and handle acquisition are synchronous.
//!
//! The engine is injected as `Arc<dyn StorageEngine>`; [`MemoryEngine`] is
//! the in-process implementation, optionally persisted to a JSON snapshot.

pub mod memory;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Datum, Key, KeyRange};
use crate::request::Request;

pub use memory::MemoryEngine;

/// Identifies one open connection inside an engine.
///
/// Every call to [`StorageEngine::open`] that succeeds yields a connection
/// with a fresh random id; the engine uses it to track which connections
/// would block a version upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a new random connection ID using UUIDv4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Name and version of a stored database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub version: u64,
}

/// Version transition reported to upgrade callbacks and `Blocked`
/// notifications. `new_version` is `None` when the database is being
/// deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChange {
    pub old_version: u64,
    pub new_version: Option<u64>,
}

/// Transaction access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// When a write is considered acknowledged.
///
/// `Strict` writes reach durable storage before their request succeeds.
/// `Relaxed` and `Default` writes may sit in memory until the connection
/// closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    Strict,
    Relaxed,
    #[default]
    Default,
}

/// Structural edits available inside an upgrade transaction.
pub trait SchemaEditor {
    /// Table names at this point of the upgrade, sorted.
    fn table_names(&self) -> Vec<String>;

    /// Creates an empty table. Fails if it already exists.
    fn create_table(&mut self, name: &str) -> Result<()>;

    /// Deletes a table and its rows. Fails if it does not exist.
    fn delete_table(&mut self, name: &str) -> Result<()>;
}

/// Callback run by the engine inside the atomic upgrade transaction.
///
/// Returning `Err` aborts the upgrade: no edit is kept and the open request
/// fails with the error.
pub type UpgradeCallback =
    Box<dyn FnOnce(&mut dyn SchemaEditor, VersionChange) -> Result<()> + Send>;

/// Options for [`StorageEngine::open`].
#[derive(Default)]
pub struct OpenOptions {
    /// Version to open at. `None` opens at the stored version, or version 1
    /// for a new database.
    pub version: Option<u64>,
    /// Runs once if the requested version exceeds the stored one.
    pub upgrade: Option<UpgradeCallback>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn on_upgrade<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&mut dyn SchemaEditor, VersionChange) -> Result<()> + Send + 'static,
    {
        self.upgrade = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("version", &self.version)
            .field("upgrade", &self.upgrade.is_some())
            .finish()
    }
}

/// Engine entry point: the registry of databases.
pub trait StorageEngine: Send + Sync {
    /// Lists stored databases.
    fn databases(&self) -> Request<Vec<DatabaseInfo>>;

    /// Opens (creating if needed) a database.
    ///
    /// Emits `Blocked` first when an upgrade has to wait for other
    /// connections to close.
    fn open(&self, name: &str, options: OpenOptions) -> Request<Box<dyn Connection>>;

    /// Deletes a database. Deleting an unknown database succeeds.
    fn delete_database(&self, name: &str) -> Request<()>;
}

/// An open handle on one database.
pub trait Connection: Send + Sync + fmt::Debug {
    fn id(&self) -> ConnectionId;

    fn name(&self) -> &str;

    /// Version this connection was opened at.
    fn version(&self) -> u64;

    /// Table names, sorted.
    fn table_names(&self) -> Vec<String>;

    fn has_table(&self, name: &str) -> bool {
        self.table_names().iter().any(|table| table == name)
    }

    /// Starts a transaction on one table and returns its store handle.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`](crate::error::Error::NotFound) when the table does
    /// not exist, [`Error::InvalidState`](crate::error::Error::InvalidState)
    /// when the connection is closed.
    fn transaction(
        &self,
        table: &str,
        mode: TransactionMode,
        durability: Durability,
    ) -> Result<Box<dyn ObjectStore>>;

    /// Closes the connection. Closing twice is a no-op.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Table handle scoped to one transaction.
pub trait ObjectStore: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn mode(&self) -> TransactionMode;

    /// Succeeds with `None` when the key is absent.
    fn get(&self, key: &Key) -> Request<Option<Datum>>;

    /// Inserts or replaces the row; succeeds with the key.
    fn put(&self, value: Datum, key: Key) -> Request<Key>;

    /// Removes the row if present.
    fn delete(&self, key: &Key) -> Request<()>;

    /// Removes every row.
    fn clear(&self) -> Request<()>;

    fn count(&self, range: Option<&KeyRange>) -> Request<u64>;

    /// Opens a key+value cursor. Emits one `Success` per position and a
    /// final `Success(None)` once exhausted.
    fn open_cursor(&self, range: Option<KeyRange>) -> Request<Option<Cursor>>;

    /// Like [`open_cursor`](Self::open_cursor) but positions carry no value.
    fn open_key_cursor(&self, range: Option<KeyRange>) -> Request<Option<Cursor>>;
}

/// Moves a cursor. The engine answers on the cursor's request.
pub trait CursorDriver: Send + Sync {
    /// Moves `count` positions forward. `count == 0` is an error event.
    fn advance(&self, count: u32);
}

/// One cursor position.
///
/// Moving the cursor consumes the position: the next one arrives as a new
/// event on the cursor request.
pub struct Cursor {
    key: Key,
    value: Option<Datum>,
    driver: Arc<dyn CursorDriver>,
}

impl Cursor {
    pub fn new(key: Key, value: Option<Datum>, driver: Arc<dyn CursorDriver>) -> Self {
        Self { key, value, driver }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// `None` for key-only cursors.
    pub fn value(&self) -> Option<&Datum> {
        self.value.as_ref()
    }

    /// Moves to the next position.
    pub fn step(self) {
        self.driver.advance(1);
    }

    /// Skips `count` positions.
    pub fn advance(self, count: u32) {
        self.driver.advance(count);
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("key", &self.key)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert_eq!(id1.to_string(), id1.as_uuid().to_string());
    }

    #[test]
    fn test_open_options_builder() {
        let options = OpenOptions::new().version(3).on_upgrade(|_, _| Ok(()));
        assert_eq!(options.version, Some(3));
        assert!(options.upgrade.is_some());
        assert!(format!("{:?}", options).contains("upgrade: true"));
    }

    #[test]
    fn test_durability_default() {
        assert_eq!(Durability::default(), Durability::Default);
    }
}
