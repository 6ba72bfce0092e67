//! In-memory storage engine
//!
//! [`MemoryEngine`] keeps every database in process memory and follows the
//! engine's versioning rules:
//!
//! - opening an unknown database creates it (version 1 unless asked for more)
//! - opening above the stored version runs the upgrade callback once, on a
//!   copy of the schema that is committed only if the callback succeeds
//! - upgrades and deletes wait while other connections to the database are
//!   open, emitting `Blocked` first
//!
//! With [`MemoryEngine::persistent`] the state is also written to a JSON
//! snapshot after schema changes and strict-durability writes.

mod connection;
mod cursor;
mod snapshot;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::engine::{
    Connection, ConnectionId, DatabaseInfo, OpenOptions, SchemaEditor, StorageEngine,
    UpgradeCallback, VersionChange,
};
use crate::error::{Error, Result};
use crate::model::{Datum, Key};
use crate::request::{Request, Responder};

use connection::MemoryConnection;
use snapshot::Snapshot;

pub(crate) type TableRows = BTreeMap<Key, Datum>;

/// One stored database.
#[derive(Debug, Clone)]
pub(crate) struct DatabaseState {
    pub(crate) version: u64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) tables: BTreeMap<String, TableRows>,
}

impl DatabaseState {
    pub(crate) fn new(version: u64) -> Self {
        Self {
            version,
            created_at: Utc::now(),
            tables: BTreeMap::new(),
        }
    }
}

/// An open or delete waiting for connections to close.
enum PendingOp {
    Open {
        name: String,
        version: Option<u64>,
        upgrade: Option<UpgradeCallback>,
        responder: Responder<Box<dyn Connection>>,
    },
    Delete {
        name: String,
        responder: Responder<()>,
    },
}

impl PendingOp {
    fn name(&self) -> &str {
        match self {
            PendingOp::Open { name, .. } | PendingOp::Delete { name, .. } => name,
        }
    }

    /// The caller stopped waiting.
    fn is_abandoned(&self) -> bool {
        match self {
            PendingOp::Open { responder, .. } => responder.is_closed(),
            PendingOp::Delete { responder, .. } => responder.is_closed(),
        }
    }
}

#[derive(Default)]
pub(crate) struct EngineState {
    databases: BTreeMap<String, DatabaseState>,
    /// Open connection → database name
    connections: HashMap<ConnectionId, String>,
    pending: VecDeque<PendingOp>,
    /// Connections whose open request was dropped; closed after unlocking
    orphans: Vec<Box<dyn Connection>>,
    /// Writes not yet in the snapshot
    dirty: bool,
}

impl EngineState {
    fn open_connections(&self, name: &str) -> usize {
        self.connections.values().filter(|db| *db == name).count()
    }

    fn has_pending(&self, name: &str) -> bool {
        self.pending.iter().any(|op| op.name() == name)
    }

    /// Rows of a table reachable through connection `id`.
    pub(crate) fn table(&self, id: ConnectionId, database: &str, table: &str) -> Result<&TableRows> {
        self.check_connection(id)?;
        self.databases
            .get(database)
            .and_then(|db| db.tables.get(table))
            .ok_or_else(|| Error::NotFound(format!("table '{}.{}'", database, table)))
    }

    pub(crate) fn table_mut(
        &mut self,
        id: ConnectionId,
        database: &str,
        table: &str,
    ) -> Result<&mut TableRows> {
        self.check_connection(id)?;
        self.databases
            .get_mut(database)
            .and_then(|db| db.tables.get_mut(table))
            .ok_or_else(|| Error::NotFound(format!("table '{}.{}'", database, table)))
    }

    pub(crate) fn table_names(&self, database: &str) -> Vec<String> {
        self.databases
            .get(database)
            .map(|db| db.tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn check_connection(&self, id: ConnectionId) -> Result<()> {
        if self.connections.contains_key(&id) {
            Ok(())
        } else {
            Err(Error::InvalidState(format!("connection {} is closed", id)))
        }
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

/// State shared by the engine and every handle it gives out.
pub(crate) struct Shared {
    pub(crate) state: Mutex<EngineState>,
    snapshot: Option<Snapshot>,
}

impl Shared {
    /// Writes the snapshot, if persistence is configured.
    pub(crate) fn flush(&self, state: &mut EngineState) -> Result<()> {
        if let Some(snapshot) = &self.snapshot {
            snapshot.write(&state.databases)?;
        }
        state.dirty = false;
        Ok(())
    }

    /// Unregisters a connection and lets waiting operations proceed.
    pub(crate) fn close_connection(self: &Arc<Self>, id: ConnectionId) {
        let mut state = self.state.lock();
        if let Some(name) = state.connections.remove(&id) {
            debug!(db = %name, connection = %id, "Connection closed");
        }
        if state.dirty {
            if let Err(e) = self.flush(&mut state) {
                warn!(error = %e, "Failed to flush on connection close");
            }
        }
        self.drain_pending(&mut state);
        Self::unlock(state);
    }

    /// Retries queued operations in arrival order.
    fn drain_pending(self: &Arc<Self>, state: &mut EngineState) {
        let queued = std::mem::take(&mut state.pending);
        for op in queued {
            if op.is_abandoned() {
                continue;
            }
            // Nothing overtakes an earlier waiter on the same database.
            if state.has_pending(op.name()) {
                state.pending.push_back(op);
                continue;
            }
            match op {
                PendingOp::Open {
                    name,
                    version,
                    upgrade,
                    responder,
                } => self.open_locked(state, name, version, upgrade, responder),
                PendingOp::Delete { name, responder } => self.delete_locked(state, name, responder),
            }
        }
    }

    /// Releases the lock, then drops connections nobody received.
    ///
    /// Dropping a connection closes it, which takes the lock again.
    fn unlock(guard: MutexGuard<'_, EngineState>) {
        let mut guard = guard;
        let orphans = std::mem::take(&mut guard.orphans);
        drop(guard);
        drop(orphans);
    }

    /// Opens, upgrades, or queues. Always answers `responder` unless queued.
    fn open_locked(
        self: &Arc<Self>,
        state: &mut EngineState,
        name: String,
        version: Option<u64>,
        upgrade: Option<UpgradeCallback>,
        responder: Responder<Box<dyn Connection>>,
    ) {
        let current = state.databases.get(&name).map(|db| db.version);
        let target = version.or(current).unwrap_or(1);

        if let Some(current) = current {
            if target < current {
                responder.error(Error::Version {
                    database: name,
                    requested: target,
                    current,
                });
                return;
            }
        }

        let needs_upgrade = current.map_or(true, |current| target > current);
        let change = VersionChange {
            old_version: current.unwrap_or(0),
            new_version: Some(target),
        };
        let blocked = needs_upgrade && state.open_connections(&name) > 0;
        if blocked || state.has_pending(&name) {
            if needs_upgrade {
                warn!(
                    db = %name,
                    old_version = change.old_version,
                    new_version = target,
                    "Upgrade blocked by open connections"
                );
                responder.blocked(change);
            }
            state.pending.push_back(PendingOp::Open {
                name,
                version,
                upgrade,
                responder,
            });
            return;
        }

        if !needs_upgrade {
            self.connect(state, &name, target, &responder);
            return;
        }

        let mut next = state
            .databases
            .get(&name)
            .cloned()
            .unwrap_or_else(|| DatabaseState::new(target));
        next.version = target;

        if let Some(callback) = upgrade {
            let mut editor = UpgradeEditor {
                tables: &mut next.tables,
            };
            if let Err(e) = callback(&mut editor, change) {
                warn!(db = %name, error = %e, "Upgrade callback failed, upgrade aborted");
                responder.abort(Error::Aborted(format!(
                    "upgrade of '{}' to version {}: {}",
                    name, target, e
                )));
                return;
            }
        }

        let previous = state.databases.insert(name.clone(), next);
        if let Err(e) = self.flush(state) {
            match previous {
                Some(previous) => state.databases.insert(name.clone(), previous),
                None => state.databases.remove(&name),
            };
            responder.error(e);
            return;
        }

        info!(
            db = %name,
            old_version = change.old_version,
            new_version = target,
            "Database upgraded"
        );
        self.connect(state, &name, target, &responder);
    }

    fn delete_locked(self: &Arc<Self>, state: &mut EngineState, name: String, responder: Responder<()>) {
        let Some(version) = state.databases.get(&name).map(|db| db.version) else {
            responder.success(());
            return;
        };

        if state.open_connections(&name) > 0 || state.has_pending(&name) {
            warn!(db = %name, "Delete blocked by open connections");
            responder.blocked(VersionChange {
                old_version: version,
                new_version: None,
            });
            state.pending.push_back(PendingOp::Delete { name, responder });
            return;
        }

        let removed = state.databases.remove(&name);
        if let Err(e) = self.flush(state) {
            if let Some(removed) = removed {
                state.databases.insert(name, removed);
            }
            responder.error(e);
            return;
        }

        info!(db = %name, "Database deleted");
        responder.success(());
    }

    fn connect(
        self: &Arc<Self>,
        state: &mut EngineState,
        name: &str,
        version: u64,
        responder: &Responder<Box<dyn Connection>>,
    ) {
        let id = ConnectionId::new();
        state.connections.insert(id, name.to_string());
        debug!(db = %name, version, connection = %id, "Connection opened");

        let connection: Box<dyn Connection> = Box::new(MemoryConnection::new(
            id,
            name.to_string(),
            version,
            Arc::clone(self),
        ));
        if let Some(orphan) = responder.offer(connection) {
            debug!(db = %name, connection = %id, "Open request dropped, closing connection");
            state.orphans.push(orphan);
        }
    }
}

/// Schema editor over the upgrade copy of a database.
struct UpgradeEditor<'a> {
    tables: &'a mut BTreeMap<String, TableRows>,
}

impl SchemaEditor for UpgradeEditor<'_> {
    fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    fn create_table(&mut self, name: &str) -> Result<()> {
        if self.tables.contains_key(name) {
            return Err(Error::InvalidArgument(format!(
                "table '{}' already exists",
                name
            )));
        }
        self.tables.insert(name.to_string(), TableRows::new());
        Ok(())
    }

    fn delete_table(&mut self, name: &str) -> Result<()> {
        self.tables
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("table '{}'", name)))
    }
}

/// In-process storage engine.
///
/// Cloning is cheap; clones share the same databases.
#[derive(Clone)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

impl MemoryEngine {
    /// Create a volatile engine
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::default()),
                snapshot: None,
            }),
        }
    }

    /// Create an engine backed by a JSON snapshot at `path`, loading it if
    /// it exists.
    pub fn persistent<P: AsRef<Path>>(path: P) -> Result<Self> {
        let snapshot = Snapshot::new(path);
        let databases = snapshot.load()?;
        info!(path = ?snapshot.path(), "Initialized persistent memory engine");

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState {
                    databases,
                    ..EngineState::default()
                }),
                snapshot: Some(snapshot),
            }),
        })
    }

    /// Writes pending relaxed-durability changes to the snapshot.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        self.shared.flush(&mut state)
    }

    /// Number of open connections to `name`.
    pub fn open_connections(&self, name: &str) -> usize {
        self.shared.state.lock().open_connections(name)
    }

    /// True when the engine writes a snapshot.
    pub fn is_persistent(&self) -> bool {
        self.shared.snapshot.is_some()
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("persistent", &self.is_persistent())
            .finish_non_exhaustive()
    }
}

impl StorageEngine for MemoryEngine {
    fn databases(&self) -> Request<Vec<DatabaseInfo>> {
        let state = self.shared.state.lock();
        let infos = state
            .databases
            .iter()
            .map(|(name, db)| DatabaseInfo {
                name: name.clone(),
                version: db.version,
            })
            .collect();
        Request::succeeded("databases", infos)
    }

    #[instrument(skip(self, options), fields(version = ?options.version))]
    fn open(&self, name: &str, options: OpenOptions) -> Request<Box<dyn Connection>> {
        let (responder, request) = Request::channel(format!("open {}", name));

        if options.version == Some(0) {
            responder.error(Error::InvalidArgument(
                "database version must be at least 1".to_string(),
            ));
            return request;
        }

        let mut state = self.shared.state.lock();
        state.pending.retain(|op| !op.is_abandoned());
        self.shared
            .open_locked(&mut state, name.to_string(), options.version, options.upgrade, responder);
        Shared::unlock(state);
        request
    }

    #[instrument(skip(self))]
    fn delete_database(&self, name: &str) -> Request<()> {
        let (responder, request) = Request::channel(format!("delete {}", name));
        let mut state = self.shared.state.lock();
        state.pending.retain(|op| !op.is_abandoned());
        self.shared.delete_locked(&mut state, name.to_string(), responder);
        Shared::unlock(state);
        request
    }
}
