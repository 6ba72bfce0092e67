//! Schema migrations
//!
//! Tables are only ever created or deleted inside the engine's upgrade
//! transaction, so every effective change reopens the database one version
//! higher:
//!
//! ```text
//! filter no-ops ─→ nothing left? ─→ return handle unchanged
//!        │
//!        └─→ close handle ─→ open(version + 1) ─→ upgrade: create/delete tables
//! ```
//!
//! A reopen that reports `Blocked` fails at once with
//! [`Error::BlockedUpgrade`]. The pending upgrade is abandoned, so closing
//! the other handles and calling again is the way to recover.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::database::Database;
use crate::engine::{OpenOptions, SchemaEditor};
use crate::error::{Error, Result};
use crate::request::RequestEvent;

/// Structural edit applied by [`Database::apply_table_changes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableChange {
    Create,
    Delete,
}

impl TableChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableChange::Create => "create",
            TableChange::Delete => "delete",
        }
    }

    /// True when applying this change to `name` would do nothing.
    fn is_noop(&self, db: &Database, name: &str) -> bool {
        match self {
            TableChange::Create => db.has_table(name),
            TableChange::Delete => !db.has_table(name),
        }
    }

    fn apply(&self, schema: &mut dyn SchemaEditor, name: &str) -> Result<()> {
        match self {
            TableChange::Create => schema.create_table(name),
            TableChange::Delete => schema.delete_table(name),
        }
    }
}

impl fmt::Display for TableChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Database {
    /// Creates or deletes `names`, bumping the version by one.
    ///
    /// Names already in the requested state are skipped. If none remain the
    /// handle comes back unchanged; otherwise it is closed and a handle on
    /// the upgraded database is returned.
    ///
    /// # Errors
    ///
    /// - [`Error::BlockedUpgrade`] if another connection to the database is
    ///   open
    /// - [`Error::Aborted`] if the engine rejects the structural edit
    #[instrument(skip(self, names), fields(db = %self.name(), version = self.version()))]
    pub async fn apply_table_changes<I, S>(self, names: I, change: TableChange) -> Result<Database>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut effective: Vec<String> = names
            .into_iter()
            .map(Into::into)
            .filter(|name| !change.is_noop(&self, name))
            .collect();
        effective.sort();
        effective.dedup();

        if effective.is_empty() {
            debug!("No effective table changes, keeping handle");
            return Ok(self);
        }

        let name = self.name().to_string();
        let version = self.version();
        let durability = self.durability();
        let engine = Arc::clone(self.engine());
        self.close();

        let target = version + 1;
        let tables = effective.clone();
        let options = OpenOptions::new()
            .version(target)
            .on_upgrade(move |schema, _| {
                tables
                    .iter()
                    .try_for_each(|table| change.apply(&mut *schema, table))
            });

        let mut request = engine.open(&name, options);
        let connection = loop {
            match request.next_event().await {
                Some(RequestEvent::Success(connection)) | Some(RequestEvent::Complete(connection)) => {
                    break connection;
                }
                Some(RequestEvent::Abort(e)) | Some(RequestEvent::Error(e)) => return Err(e),
                Some(RequestEvent::Blocked(_)) => {
                    warn!(
                        db = %name,
                        old_version = version,
                        new_version = target,
                        "Migration blocked by another open connection"
                    );
                    metrics::counter!("tablekv_blocked_upgrades_total").increment(1);
                    return Err(Error::BlockedUpgrade {
                        database: name,
                        old_version: version,
                        new_version: target,
                    });
                }
                None => return Err(Error::RequestDropped(request.label().to_string())),
            }
        };

        info!(
            db = %name,
            %change,
            tables = ?effective,
            new_version = target,
            "Tables migrated"
        );
        metrics::counter!("tablekv_migrations_total", "change" => change.as_str()).increment(1);

        Ok(Database::from_connection(engine, connection, durability))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Durability, MemoryEngine, StorageEngine};

    async fn open(engine: &Arc<dyn StorageEngine>) -> Result<Database> {
        Database::open(Arc::clone(engine), "d", Durability::Strict).await
    }

    #[tokio::test]
    async fn test_create_bumps_version() -> Result<()> {
        let engine: Arc<dyn StorageEngine> = Arc::new(MemoryEngine::new());
        let db = open(&engine).await?;

        let db = db.apply_table_changes(["b", "a", "a"], TableChange::Create).await?;
        assert_eq!(db.version(), 2);
        assert_eq!(db.table_names(), vec!["a".to_string(), "b".to_string()]);

        let db = db.apply_table_changes(["a"], TableChange::Delete).await?;
        assert_eq!(db.version(), 3);
        assert_eq!(db.table_names(), vec!["b".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_noop_keeps_handle() -> Result<()> {
        let engine: Arc<dyn StorageEngine> = Arc::new(MemoryEngine::new());
        let db = open(&engine).await?;
        let db = db.apply_table_changes(["t"], TableChange::Create).await?;

        let db = db.apply_table_changes(["t"], TableChange::Create).await?;
        assert_eq!(db.version(), 2);
        let db = db.apply_table_changes(["missing"], TableChange::Delete).await?;
        assert_eq!(db.version(), 2);
        assert!(!db.is_closed());
        Ok(())
    }

    #[tokio::test]
    async fn test_blocked_migration_fails() -> Result<()> {
        let memory = MemoryEngine::new();
        let engine: Arc<dyn StorageEngine> = Arc::new(memory.clone());
        let db = open(&engine).await?;
        let other = open(&engine).await?;

        let result = db.apply_table_changes(["t"], TableChange::Create).await;
        assert_eq!(
            result.unwrap_err(),
            Error::BlockedUpgrade {
                database: "d".to_string(),
                old_version: 1,
                new_version: 2,
            }
        );

        // The abandoned upgrade never runs
        drop(other);
        let db = open(&engine).await?;
        assert_eq!(db.version(), 1);
        assert!(db.table_names().is_empty());
        assert_eq!(memory.open_connections("d"), 1);
        Ok(())
    }

    #[test]
    fn test_change_display() {
        assert_eq!(TableChange::Create.to_string(), "create");
        assert_eq!(TableChange::Delete.as_str(), "delete");
    }
}
