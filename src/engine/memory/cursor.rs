//! Forward cursors over live table rows

use parking_lot::Mutex;
use std::ops::Bound;
use std::sync::{Arc, Weak};

use super::Shared;
use crate::engine::{ConnectionId, Cursor, CursorDriver};
use crate::error::Error;
use crate::model::{Key, KeyRange};
use crate::request::{Request, Responder};

/// Drives one cursor request.
///
/// Each move looks the next row up in the current table contents, strictly
/// after the last key reported, so rows written between moves are seen.
pub(crate) struct MemoryCursor {
    shared: Arc<Shared>,
    connection: ConnectionId,
    database: String,
    table: String,
    range: Option<KeyRange>,
    with_values: bool,
    position: Mutex<Option<Key>>,
    responder: Responder<Option<Cursor>>,
    this: Weak<MemoryCursor>,
}

impl MemoryCursor {
    /// Opens the cursor and reports its first position.
    pub(crate) fn open(
        label: String,
        shared: Arc<Shared>,
        connection: ConnectionId,
        database: String,
        table: String,
        range: Option<KeyRange>,
        with_values: bool,
    ) -> Request<Option<Cursor>> {
        let (responder, request) = Request::channel(label);
        let driver = Arc::new_cyclic(|this| MemoryCursor {
            shared,
            connection,
            database,
            table,
            range,
            with_values,
            position: Mutex::new(None),
            responder,
            this: this.clone(),
        });
        driver.move_by(1);
        request
    }

    fn move_by(&self, count: u32) {
        let Some(driver) = self.this.upgrade() else {
            return;
        };
        if count == 0 {
            self.responder.error(Error::InvalidArgument(
                "cursor advance count must be at least 1".to_string(),
            ));
            return;
        }

        let mut position = self.position.lock();
        let found = {
            let state = self.shared.state.lock();
            let rows = match state.table(self.connection, &self.database, &self.table) {
                Ok(rows) => rows,
                Err(e) => {
                    drop(state);
                    self.responder.error(e);
                    return;
                }
            };

            let start = match (position.as_ref(), self.range.as_ref()) {
                (Some(last), _) => Bound::Excluded(last.clone()),
                (None, Some(range)) => range.start_bound(),
                (None, None) => Bound::Unbounded,
            };
            rows.range((start, Bound::Unbounded))
                .take_while(|(key, _)| {
                    self.range
                        .as_ref()
                        .map_or(true, |range| range.below_upper(key))
                })
                .nth(count as usize - 1)
                .map(|(key, value)| (key.clone(), value.clone()))
        };

        match found {
            Some((key, value)) => {
                *position = Some(key.clone());
                drop(position);
                let value = self.with_values.then_some(value);
                self.responder
                    .success(Some(Cursor::new(key, value, driver)));
            }
            None => {
                drop(position);
                self.responder.success(None);
            }
        }
    }
}

impl CursorDriver for MemoryCursor {
    fn advance(&self, count: u32) {
        self.move_by(count);
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::{Durability, MemoryEngine, OpenOptions, StorageEngine, TransactionMode};
    use crate::error::Result;
    use crate::model::{Datum, Key, KeyRange};
    use crate::request::RequestEvent;

    async fn seeded(engine: &MemoryEngine, keys: &[&str]) -> Result<Box<dyn crate::engine::Connection>> {
        let conn = engine
            .open("d", OpenOptions::new().on_upgrade(|schema, _| schema.create_table("t")))
            .strict()
            .await?;
        let store = conn.transaction("t", TransactionMode::ReadWrite, Durability::Default)?;
        for key in keys {
            store.put(Datum::from(key.to_uppercase()), Key::from(*key)).strict().await?;
        }
        Ok(conn)
    }

    async fn next_key(
        request: &mut crate::request::Request<Option<crate::engine::Cursor>>,
    ) -> Option<crate::engine::Cursor> {
        match request.next_event().await {
            Some(RequestEvent::Success(cursor)) => cursor,
            other => panic!("unexpected cursor event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cursor_walks_in_key_order() -> Result<()> {
        let engine = MemoryEngine::new();
        let conn = seeded(&engine, &["c", "a", "b"]).await?;
        let store = conn.transaction("t", TransactionMode::ReadOnly, Durability::Default)?;

        let mut request = store.open_cursor(None);
        let mut seen = Vec::new();
        while let Some(cursor) = next_key(&mut request).await {
            seen.push((cursor.key().clone(), cursor.value().cloned()));
            cursor.step();
        }
        assert_eq!(
            seen,
            vec![
                (Key::from("a"), Some(Datum::from("A"))),
                (Key::from("b"), Some(Datum::from("B"))),
                (Key::from("c"), Some(Datum::from("C"))),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_key_cursor_advance_and_range() -> Result<()> {
        let engine = MemoryEngine::new();
        let conn = seeded(&engine, &["a", "b", "c", "d", "e"]).await?;
        let store = conn.transaction("t", TransactionMode::ReadOnly, Durability::Default)?;

        let range = KeyRange::bound("b", "d", false, false)?;
        let mut request = store.open_key_cursor(Some(range));
        let first = next_key(&mut request).await.expect("first position");
        assert_eq!(first.key(), &Key::from("b"));
        assert!(first.value().is_none());

        first.advance(2);
        let third = next_key(&mut request).await.expect("third position");
        assert_eq!(third.key(), &Key::from("d"));

        third.step();
        assert!(next_key(&mut request).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_table_and_zero_advance() -> Result<()> {
        let engine = MemoryEngine::new();
        let conn = seeded(&engine, &[]).await?;
        let store = conn.transaction("t", TransactionMode::ReadOnly, Durability::Default)?;
        let mut request = store.open_cursor(None);
        assert!(next_key(&mut request).await.is_none());

        let store = conn.transaction("t", TransactionMode::ReadWrite, Durability::Default)?;
        store.put(Datum::from(1), Key::from(1)).strict().await?;
        let mut request = store.open_cursor(None);
        let cursor = next_key(&mut request).await.expect("one row");
        cursor.advance(0);
        assert!(matches!(
            request.next_event().await,
            Some(RequestEvent::Error(crate::error::Error::InvalidArgument(_)))
        ));
        Ok(())
    }
}
