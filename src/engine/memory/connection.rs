//! Connections and transaction-scoped table handles of the memory engine

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::cursor::MemoryCursor;
use super::Shared;
use crate::engine::{
    Connection, ConnectionId, Cursor, Durability, ObjectStore, TransactionMode,
};
use crate::error::{Error, Result};
use crate::model::{Datum, Key, KeyRange};
use crate::request::Request;

/// An open connection. Dropping it closes it.
pub(crate) struct MemoryConnection {
    id: ConnectionId,
    name: String,
    version: u64,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl MemoryConnection {
    pub(crate) fn new(id: ConnectionId, name: String, version: u64, shared: Arc<Shared>) -> Self {
        Self {
            id,
            name,
            version,
            shared,
            closed: AtomicBool::new(false),
        }
    }
}

impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn table_names(&self) -> Vec<String> {
        self.shared.state.lock().table_names(&self.name)
    }

    fn transaction(
        &self,
        table: &str,
        mode: TransactionMode,
        durability: Durability,
    ) -> Result<Box<dyn ObjectStore>> {
        if self.is_closed() {
            return Err(Error::InvalidState(format!(
                "connection to '{}' is closed",
                self.name
            )));
        }
        self.shared.state.lock().table(self.id, &self.name, table)?;

        Ok(Box::new(MemoryStore {
            connection: self.id,
            database: self.name.clone(),
            table: table.to_string(),
            mode,
            durability,
            shared: Arc::clone(&self.shared),
        }))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.close_connection(self.id);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// One table inside one transaction.
pub(crate) struct MemoryStore {
    connection: ConnectionId,
    database: String,
    table: String,
    mode: TransactionMode,
    durability: Durability,
    shared: Arc<Shared>,
}

impl MemoryStore {
    fn label(&self, op: &str) -> String {
        format!("{} {}.{}", op, self.database, self.table)
    }

    /// Runs a write against the table rows, then flushes or marks dirty
    /// according to the transaction's durability. A strict write whose flush
    /// fails is rolled back.
    fn write<T, F>(&self, op: &str, apply: F) -> Request<T>
    where
        F: FnOnce(&mut super::TableRows) -> Result<T>,
    {
        let label = self.label(op);
        if self.mode == TransactionMode::ReadOnly {
            return Request::failed(label.clone(), Error::ReadOnly(label));
        }

        let strict = self.durability == Durability::Strict;
        let mut state = self.shared.state.lock();
        let applied = state
            .table_mut(self.connection, &self.database, &self.table)
            .and_then(|rows| {
                let before = strict.then(|| rows.clone());
                apply(rows).map(|value| (value, before))
            });
        let result = match applied {
            Ok((value, Some(before))) => match self.shared.flush(&mut state) {
                Ok(()) => Ok(value),
                Err(e) => {
                    if let Ok(rows) = state.table_mut(self.connection, &self.database, &self.table) {
                        *rows = before;
                    }
                    warn!(request = %label, error = %e, "Flush failed, write rolled back");
                    Err(e)
                }
            },
            Ok((value, None)) => {
                state.mark_dirty();
                Ok(value)
            }
            Err(e) => Err(e),
        };
        drop(state);

        debug!(request = %label, ok = result.is_ok(), "Write applied");
        match result {
            Ok(value) => Request::succeeded(label, value),
            Err(e) => Request::failed(label, e),
        }
    }

    fn read<T, F>(&self, op: &str, read: F) -> Request<T>
    where
        F: FnOnce(&super::TableRows) -> Result<T>,
    {
        let label = self.label(op);
        let state = self.shared.state.lock();
        let result = state
            .table(self.connection, &self.database, &self.table)
            .and_then(read);
        drop(state);

        match result {
            Ok(value) => Request::succeeded(label, value),
            Err(e) => Request::failed(label, e),
        }
    }

    fn cursor(&self, range: Option<KeyRange>, with_values: bool) -> Request<Option<Cursor>> {
        let op = if with_values { "cursor" } else { "key cursor" };
        MemoryCursor::open(
            self.label(op),
            Arc::clone(&self.shared),
            self.connection,
            self.database.clone(),
            self.table.clone(),
            range,
            with_values,
        )
    }
}

impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        &self.table
    }

    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn get(&self, key: &Key) -> Request<Option<Datum>> {
        self.read("get", |rows| Ok(rows.get(key).cloned()))
    }

    fn put(&self, value: Datum, key: Key) -> Request<Key> {
        if let Err(e) = key.validate() {
            return Request::failed(self.label("put"), e);
        }
        self.write("put", move |rows| {
            rows.insert(key.clone(), value);
            Ok(key)
        })
    }

    fn delete(&self, key: &Key) -> Request<()> {
        self.write("delete", |rows| {
            rows.remove(key);
            Ok(())
        })
    }

    fn clear(&self) -> Request<()> {
        self.write("clear", |rows| {
            rows.clear();
            Ok(())
        })
    }

    fn count(&self, range: Option<&KeyRange>) -> Request<u64> {
        self.read("count", |rows| {
            let count = match range {
                Some(range) => rows.keys().filter(|key| range.includes(key)).count(),
                None => rows.len(),
            };
            Ok(count as u64)
        })
    }

    fn open_cursor(&self, range: Option<KeyRange>) -> Request<Option<Cursor>> {
        self.cursor(range, true)
    }

    fn open_key_cursor(&self, range: Option<KeyRange>) -> Request<Option<Cursor>> {
        self.cursor(range, false)
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("database", &self.database)
            .field("table", &self.table)
            .field("mode", &self.mode)
            .field("durability", &self.durability)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MemoryEngine, OpenOptions, StorageEngine};

    async fn open_with_table(engine: &MemoryEngine) -> Result<Box<dyn Connection>> {
        engine
            .open("d", OpenOptions::new().on_upgrade(|schema, _| schema.create_table("t")))
            .strict()
            .await
    }

    #[tokio::test]
    async fn test_put_get_delete() -> Result<()> {
        let engine = MemoryEngine::new();
        let conn = open_with_table(&engine).await?;
        let store = conn.transaction("t", TransactionMode::ReadWrite, Durability::Strict)?;

        assert_eq!(store.put(Datum::from("x"), Key::from("1")).strict().await?, Key::from("1"));
        assert_eq!(store.get(&Key::from("1")).strict().await?, Some(Datum::from("x")));
        assert_eq!(store.count(None).strict().await?, 1);

        store.delete(&Key::from("1")).strict().await?;
        assert_eq!(store.get(&Key::from("1")).strict().await?, None);
        // Deleting again is fine
        store.delete(&Key::from("1")).strict().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_table_and_closed_connection() -> Result<()> {
        let engine = MemoryEngine::new();
        let conn = open_with_table(&engine).await?;

        let missing = conn.transaction("nope", TransactionMode::ReadWrite, Durability::Strict);
        assert!(missing.unwrap_err().is_not_found());

        let store = conn.transaction("t", TransactionMode::ReadWrite, Durability::Default)?;
        conn.close();
        assert!(conn.is_closed());
        assert!(matches!(
            store.get(&Key::from("1")).strict().await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            conn.transaction("t", TransactionMode::ReadOnly, Durability::Default),
            Err(Error::InvalidState(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() -> Result<()> {
        let engine = MemoryEngine::new();
        let conn = open_with_table(&engine).await?;
        let store = conn.transaction("t", TransactionMode::ReadOnly, Durability::Default)?;

        assert!(matches!(
            store.put(Datum::from(1), Key::from(1)).strict().await,
            Err(Error::ReadOnly(_))
        ));
        assert!(matches!(store.clear().strict().await, Err(Error::ReadOnly(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_nan_key_rejected() -> Result<()> {
        let engine = MemoryEngine::new();
        let conn = open_with_table(&engine).await?;
        let store = conn.transaction("t", TransactionMode::ReadWrite, Durability::Default)?;

        let result = store.put(Datum::Null, Key::Number(f64::NAN)).strict().await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_count_with_range() -> Result<()> {
        let engine = MemoryEngine::new();
        let conn = open_with_table(&engine).await?;
        let store = conn.transaction("t", TransactionMode::ReadWrite, Durability::Default)?;
        for i in 0..5 {
            store.put(Datum::from(i), Key::from(i)).strict().await?;
        }

        let range = KeyRange::bound(Key::from(1), Key::from(3), false, true)?;
        assert_eq!(store.count(Some(&range)).strict().await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_flush_rolls_back_write() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("tablekv_rollback_{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        let engine = MemoryEngine::persistent(dir.join("state.json"))?;
        let conn = open_with_table(&engine).await?;
        let store = conn.transaction("t", TransactionMode::ReadWrite, Durability::Strict)?;
        store.put(Datum::from("old"), Key::from("k")).strict().await?;

        // A file where the data directory should be makes every flush fail
        std::fs::remove_dir_all(&dir).expect("remove data dir");
        std::fs::write(&dir, b"").expect("write blocking file");

        assert!(store.put(Datum::from("new"), Key::from("k")).strict().await.is_err());
        assert!(store.put(Datum::from("v"), Key::from("other")).strict().await.is_err());
        assert_eq!(store.get(&Key::from("k")).strict().await?, Some(Datum::from("old")));
        assert_eq!(store.get(&Key::from("other")).strict().await?, None);

        std::fs::remove_file(&dir).ok();
        Ok(())
    }

    #[tokio::test]
    async fn test_drop_closes_connection() -> Result<()> {
        let engine = MemoryEngine::new();
        let conn = open_with_table(&engine).await?;
        assert_eq!(engine.open_connections("d"), 1);
        drop(conn);
        assert_eq!(engine.open_connections("d"), 0);
        Ok(())
    }
}
