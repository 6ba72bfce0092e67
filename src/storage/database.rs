//! Database handles
//!
//! A [`Database`] owns one open engine connection. Dropping the handle (or
//! calling [`Database::close`]) closes the connection, which is what lets a
//! later schema migration on the same database proceed.
//!
//! # Table access
//!
//! [`Database::table`] returns `Ok(None)` for a table that does not exist,
//! so callers branch on presence instead of on an error:
//!
//! ```no_run
//! # async fn demo(db: &tablekv::Database) -> tablekv::error::Result<()> {
//! match db.table("users")? {
//!     Some(users) => println!("{} rows", users.count(None).await?),
//!     None => println!("no users table"),
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::table::Table;
use crate::engine::{Connection, Durability, OpenOptions, StorageEngine, TransactionMode};
use crate::error::{Error, Result};

/// An open, versioned database.
pub struct Database {
    engine: Arc<dyn StorageEngine>,
    connection: Box<dyn Connection>,
    durability: Durability,
}

impl Database {
    /// Opens `name` at its stored version, creating it at version 1 if it
    /// does not exist yet.
    #[instrument(skip(engine))]
    pub async fn open(
        engine: Arc<dyn StorageEngine>,
        name: &str,
        durability: Durability,
    ) -> Result<Self> {
        let connection = engine.open(name, OpenOptions::new()).strict().await?;
        debug!(db = %name, version = connection.version(), "Database opened");
        Ok(Self::from_connection(engine, connection, durability))
    }

    pub(crate) fn from_connection(
        engine: Arc<dyn StorageEngine>,
        connection: Box<dyn Connection>,
        durability: Durability,
    ) -> Self {
        Self {
            engine,
            connection,
            durability,
        }
    }

    pub fn name(&self) -> &str {
        self.connection.name()
    }

    pub fn version(&self) -> u64 {
        self.connection.version()
    }

    /// Table names, sorted.
    pub fn table_names(&self) -> Vec<String> {
        self.connection.table_names()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.connection.has_table(name)
    }

    /// Durability used for the transactions behind [`table`](Self::table).
    pub fn durability(&self) -> Durability {
        self.durability
    }

    pub(crate) fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    /// Starts a read-write transaction on `name`.
    ///
    /// Returns `Ok(None)` when the table does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the connection is closed.
    pub fn table(&self, name: &str) -> Result<Option<Table>> {
        if !self.connection.has_table(name) {
            debug!(db = %self.name(), table = %name, "Table not found");
            return Ok(None);
        }

        match self
            .connection
            .transaction(name, TransactionMode::ReadWrite, self.durability)
        {
            Ok(store) => Ok(Some(Table::new(self.name(), store))),
            // Dropped between the check and the transaction
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Closes the connection.
    pub fn close(self) {
        self.connection.close();
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.connection.close();
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("connection", &self.connection)
            .field("durability", &self.durability)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;

    fn engine() -> Arc<dyn StorageEngine> {
        Arc::new(MemoryEngine::new())
    }

    #[tokio::test]
    async fn test_open_creates_database() -> Result<()> {
        let db = Database::open(engine(), "d", Durability::Strict).await?;
        assert_eq!(db.name(), "d");
        assert_eq!(db.version(), 1);
        assert!(db.table_names().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_table_is_none() -> Result<()> {
        let db = Database::open(engine(), "d", Durability::Strict).await?;
        assert!(db.table("nope")?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_drop_releases_connection() -> Result<()> {
        let memory = MemoryEngine::new();
        let engine: Arc<dyn StorageEngine> = Arc::new(memory.clone());

        let db = Database::open(Arc::clone(&engine), "d", Durability::Strict).await?;
        let again = Database::open(engine, "d", Durability::Strict).await?;
        assert_eq!(memory.open_connections("d"), 2);

        db.close();
        drop(again);
        assert_eq!(memory.open_connections("d"), 0);
        Ok(())
    }
}
