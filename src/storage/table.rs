//! Table handles and row operations
//!
//! Batched row operations issue one engine request per key and wait for all
//! of them. There is no atomicity across keys, and per-key read-then-write
//! operations (`get_or_init`, `update`) are two separate engine calls.
//!
//! Row reads and writes are lenient: a failed read is reported as an absent
//! row and a failed write is skipped, and a batch resolves only once every
//! request in it has. `count`, `clear` and the cursor walks are strict.

use futures::future::join_all;
use std::fmt;
use tracing::{debug, instrument};

use super::page::{self, Page};
use crate::engine::ObjectStore;
use crate::error::{Error, Result};
use crate::model::{Datum, Key, KeyRange};

/// A table inside one read-write transaction.
pub struct Table {
    database: String,
    store: Box<dyn ObjectStore>,
}

impl Table {
    pub(crate) fn new(database: &str, store: Box<dyn ObjectStore>) -> Self {
        Self {
            database: database.to_string(),
            store,
        }
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Keys of the rows in `page`, in key order.
    pub async fn keys(&self, page: &Page) -> Result<Vec<Key>> {
        let request = self.store.open_key_cursor(page.range.clone());
        page::collect(request, page, |cursor| Ok(cursor.key().clone())).await
    }

    /// Values of the rows in `page`, in key order.
    pub async fn values(&self, page: &Page) -> Result<Vec<Datum>> {
        let request = self.store.open_cursor(page.range.clone());
        page::collect(request, page, |cursor| {
            cursor
                .value()
                .cloned()
                .ok_or_else(|| Error::InvalidState("cursor position has no value".to_string()))
        })
        .await
    }

    /// `(key, value)` pairs of the rows in `page`, in key order.
    pub async fn entries(&self, page: &Page) -> Result<Vec<(Key, Datum)>> {
        let request = self.store.open_cursor(page.range.clone());
        page::collect(request, page, |cursor| {
            let value = cursor
                .value()
                .cloned()
                .ok_or_else(|| Error::InvalidState("cursor position has no value".to_string()))?;
            Ok((cursor.key().clone(), value))
        })
        .await
    }

    /// Number of rows, optionally restricted to `range`.
    pub async fn count(&self, range: Option<&KeyRange>) -> Result<u64> {
        self.store.count(range).strict().await
    }

    /// Current values for `keys`, `None` where a row is absent.
    pub async fn get<I, K>(&self, keys: I) -> Vec<Option<Datum>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let reads = keys
            .into_iter()
            .map(|key| self.store.get(&key.into()).lenient());
        join_all(reads)
            .await
            .into_iter()
            .map(Option::flatten)
            .collect()
    }

    /// Current values for each key, writing the paired default where a row
    /// is absent.
    ///
    /// The read and the write are separate requests. Two callers racing on
    /// the same absent key can both write their default; the last write wins
    /// while each caller gets its own default back.
    #[instrument(skip(self, entries), fields(table = %self.name()))]
    pub async fn get_or_init<I, K>(&self, entries: I) -> Vec<Datum>
    where
        I: IntoIterator<Item = (K, Datum)>,
        K: Into<Key>,
    {
        let store = &self.store;
        let tasks = entries.into_iter().map(|(key, default)| {
            let key = key.into();
            async move {
                match store.get(&key).lenient().await.flatten() {
                    Some(current) => current,
                    None => {
                        debug!(%key, "Row absent, writing default");
                        store.put(default.clone(), key).lenient().await;
                        default
                    }
                }
            }
        });
        join_all(tasks).await
    }

    /// Upserts every pair. Returns how many writes succeeded.
    #[instrument(skip(self, entries), fields(table = %self.name()))]
    pub async fn set<I, K>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (K, Datum)>,
        K: Into<Key>,
    {
        let writes = entries
            .into_iter()
            .map(|(key, value)| self.store.put(value, key.into()).lenient());
        let written = succeeded(join_all(writes).await);
        debug!(rows = written, "Rows written");
        written
    }

    /// Deletes every key. Absent keys are fine. Returns how many deletes
    /// succeeded.
    #[instrument(skip(self, keys), fields(table = %self.name()))]
    pub async fn del<I, K>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let deletes = keys
            .into_iter()
            .map(|key| self.store.delete(&key.into()).lenient());
        succeeded(join_all(deletes).await)
    }

    /// Rewrites each row with `transform(current)`, where `current` is
    /// `None` for an absent row. Returns the computed values.
    #[instrument(skip(self, entries), fields(table = %self.name()))]
    pub async fn update<I, K, F>(&self, entries: I) -> Vec<Datum>
    where
        I: IntoIterator<Item = (K, F)>,
        K: Into<Key>,
        F: FnOnce(Option<Datum>) -> Datum,
    {
        let store = &self.store;
        let tasks = entries.into_iter().map(|(key, transform)| {
            let key = key.into();
            async move {
                let current = store.get(&key).lenient().await.flatten();
                let next = transform(current);
                store.put(next.clone(), key).lenient().await;
                next
            }
        });
        join_all(tasks).await
    }

    /// Removes every row.
    #[instrument(skip(self), fields(table = %self.name()))]
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().strict().await
    }
}

fn succeeded<T>(outcomes: Vec<Option<T>>) -> usize {
    outcomes.iter().filter(|outcome| outcome.is_some()).count()
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("database", &self.database)
            .field("store", &self.store)
            .finish()
    }
}
