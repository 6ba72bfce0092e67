//! Storage layer
//!
//! # Architecture
//!
//! The layer speaks database/table/row and is written against an injected
//! [`StorageEngine`]:
//!
//! ```text
//! Storage (facade over Arc<dyn StorageEngine>)
//!   └─→ Database (one open connection, versioned)
//!        └─→ Table (one read-write transaction on one table)
//!             └─→ rows: keys/values/entries/count/get/set/del/update
//! ```
//!
//! ## Schema changes
//!
//! Tables are created and dropped only through
//! [`Database::apply_table_changes`], which reopens the database one version
//! higher. Any other open [`Database`] on the same name blocks it, so handles
//! should be closed (or dropped) once they are no longer needed.
//!
//! ## Completion
//!
//! Every engine request is awaited through
//! [`Request::strict`](crate::request::Request::strict) or
//! [`Request::lenient`](crate::request::Request::lenient). Row reads and
//! writes are lenient, everything else is strict.

pub mod database;
pub mod migrate;
pub mod page;
pub mod table;

pub use database::Database;
pub use migrate::TableChange;
pub use page::Page;
pub use table::Table;

use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::engine::{Durability, StorageEngine};
use crate::error::Result;

/// Main storage interface
#[derive(Clone)]
pub struct Storage {
    engine: Arc<dyn StorageEngine>,
    durability: Durability,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("durability", &self.durability)
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// Table handles use strict durability unless changed with
    /// [`with_durability`](Self::with_durability).
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            engine,
            durability: Durability::Strict,
        }
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    /// Deletes every database.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        let names = self.database_keys().await?;
        let deletes = names
            .iter()
            .map(|name| self.engine.delete_database(name).strict());
        // Every delete settles before the first failure is reported
        join_all(deletes)
            .await
            .into_iter()
            .collect::<Result<Vec<()>>>()?;
        info!(databases = names.len(), "Storage cleared");
        Ok(())
    }

    /// Names of all stored databases.
    pub async fn database_keys(&self) -> Result<Vec<String>> {
        let databases = self.engine.databases().strict().await?;
        Ok(databases.into_iter().map(|db| db.name).collect())
    }

    /// Opens `name`, creating it if needed.
    pub async fn database_get(&self, name: &str) -> Result<Database> {
        Database::open(Arc::clone(&self.engine), name, self.durability).await
    }

    /// Same as [`database_get`](Self::database_get): opening creates.
    pub async fn database_set(&self, name: &str) -> Result<Database> {
        self.database_get(name).await
    }

    /// Deletes `name`, waiting for its open handles to close.
    #[instrument(skip(self))]
    pub async fn database_del(&self, name: &str) -> Result<()> {
        self.engine.delete_database(name).strict().await
    }

    /// Drops every table of `name`.
    #[instrument(skip(self))]
    pub async fn database_clear(&self, name: &str) -> Result<()> {
        let db = self.database_get(name).await?;
        let tables = db.table_names();
        db.apply_table_changes(tables, TableChange::Delete)
            .await?
            .close();
        Ok(())
    }

    /// Table names of an open database.
    pub fn table_keys(&self, db: &Database) -> Vec<String> {
        db.table_names()
    }

    /// Read-write handle on `name`, or `None` if there is no such table.
    pub fn table_get(&self, db: &Database, name: &str) -> Result<Option<Table>> {
        db.table(name)
    }

    /// Creates the tables of `names` missing from `database`.
    #[instrument(skip(self, names))]
    pub async fn table_set<I, S>(&self, database: &str, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.migrate(database, names, TableChange::Create).await
    }

    /// Deletes the tables of `names` present in `database`.
    #[instrument(skip(self, names))]
    pub async fn table_del<I, S>(&self, database: &str, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.migrate(database, names, TableChange::Delete).await
    }

    /// Removes every row of `table`.
    pub async fn table_clear(&self, table: &Table) -> Result<()> {
        table.clear().await
    }

    async fn migrate<I, S>(&self, database: &str, names: I, change: TableChange) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let db = self.database_get(database).await?;
        db.apply_table_changes(names, change).await?.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use crate::model::{Datum, Key};

    fn storage() -> Storage {
        Storage::new(Arc::new(MemoryEngine::new()))
    }

    #[tokio::test]
    async fn test_database_lifecycle() -> Result<()> {
        let storage = storage();
        storage.database_set("a").await?.close();
        storage.database_set("b").await?.close();
        assert_eq!(storage.database_keys().await?, vec!["a".to_string(), "b".to_string()]);

        storage.database_del("a").await?;
        assert_eq!(storage.database_keys().await?, vec!["b".to_string()]);

        storage.clear().await?;
        assert!(storage.database_keys().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_table_set_and_del() -> Result<()> {
        let storage = storage();
        storage.table_set("d", ["t", "u"]).await?;
        storage.table_set("d", ["t"]).await?;

        let db = storage.database_get("d").await?;
        assert_eq!(db.version(), 2);
        assert_eq!(storage.table_keys(&db), vec!["t".to_string(), "u".to_string()]);
        db.close();

        storage.table_del("d", ["u", "missing"]).await?;
        let db = storage.database_get("d").await?;
        assert_eq!(db.version(), 3);
        assert_eq!(storage.table_keys(&db), vec!["t".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_database_clear_and_table_clear() -> Result<()> {
        let storage = storage();
        storage.table_set("d", ["t", "u"]).await?;

        let db = storage.database_get("d").await?;
        let t = storage.table_get(&db, "t")?.expect("table t");
        t.set([("k", Datum::from(1))]).await;
        storage.table_clear(&t).await?;
        assert!(t.keys(&Page::new()).await?.is_empty());
        db.close();

        storage.database_clear("d").await?;
        let db = storage.database_get("d").await?;
        assert!(storage.table_keys(&db).is_empty());
        assert!(storage.table_get(&db, "t")?.is_none());
        assert_eq!(t.get([Key::from("k")]).await, vec![None]);
        Ok(())
    }
}
