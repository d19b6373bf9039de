use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::debug;

use crate::error::{HostError, HostErrorKind};
use crate::key::{Key, KeyPath};
use crate::request::{Deletion, Request, Responder};
use crate::traits::{
    Connection, IndexInfo, IndexParams, RecordOps, StorageEngine, StoreInfo, StoreParams, TxMode,
    UpgradeHandler, VersionChange,
};

/// In-memory storage engine.
///
/// Everything lives in `BTreeMap`s behind one mutex; nothing touches disk.
/// It follows the host contract closely enough to test upgrade flows
/// against: version-change transactions commit or abort as a unit, opens
/// and deletes that would bump the version while other connections are
/// open report `Blocked` and stay pending until those connections close,
/// and requests for the same database are served in the order they were
/// issued.
///
/// Upgrade handlers run while the engine is locked and must not call back
/// into it; they get everything they need through [`VersionChange`].
///
/// # Example
///
/// ```
/// use vstore_host::{Connection, MemoryEngine, RequestEvent, StorageEngine};
///
/// # tokio_test_block_on(async {
/// let engine = MemoryEngine::new();
/// let mut request = engine.open("library", None, None);
/// let Some(RequestEvent::Success(conn)) = request.next_event().await else {
///     panic!("open failed");
/// };
/// assert_eq!(conn.version(), 1);
/// conn.close();
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MemoryEngine {
    shared: Arc<Mutex<EngineState>>,
}

impl MemoryEngine {
    /// Create an engine with no databases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored version of a database, or `None` if it does not exist.
    pub fn database_version(&self, name: &str) -> Option<u32> {
        lock(&self.shared).databases.get(name).map(|db| db.version)
    }

    /// Names of all existing databases.
    pub fn database_names(&self) -> Vec<String> {
        lock(&self.shared).databases.keys().cloned().collect()
    }

    /// Number of open connections to a database.
    pub fn open_connections(&self, name: &str) -> usize {
        lock(&self.shared).open_connections(name)
    }

    /// Number of requests waiting on a database.
    pub fn pending_requests(&self, name: &str) -> usize {
        lock(&self.shared)
            .pending
            .iter()
            .filter(|p| p.database() == name)
            .count()
    }
}

impl fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.shared);
        f.debug_struct("MemoryEngine")
            .field("databases", &state.databases.keys().collect::<Vec<_>>())
            .field("open_connections", &state.connections.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl StorageEngine for MemoryEngine {
    type Conn = MemoryConnection;

    fn open(
        &self,
        name: &str,
        version: Option<u32>,
        on_upgrade: Option<UpgradeHandler>,
    ) -> Request<MemoryConnection> {
        let (responder, request) = Request::channel();
        let pending = Pending::Open {
            name: name.to_string(),
            version,
            handler: on_upgrade,
            responder,
            blocked_sent: false,
        };
        lock(&self.shared).dispatch(&self.shared, pending);
        request
    }

    fn delete_database(&self, name: &str) -> Request<Deletion> {
        let (responder, request) = Request::channel();
        let pending = Pending::Delete {
            name: name.to_string(),
            responder,
            blocked_sent: false,
        };
        lock(&self.shared).dispatch(&self.shared, pending);
        request
    }

    fn cmp(&self, a: &Key, b: &Key) -> std::cmp::Ordering {
        a.cmp(b)
    }
}

fn lock(shared: &Mutex<EngineState>) -> MutexGuard<'_, EngineState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Engine state ────────────────────────────────────────────────────

#[derive(Default)]
struct EngineState {
    databases: BTreeMap<String, Database>,
    /// Open connections: id -> database name.
    connections: BTreeMap<u64, String>,
    pending: Vec<Pending>,
    next_connection: u64,
}

enum Pending {
    Open {
        name: String,
        version: Option<u32>,
        handler: Option<UpgradeHandler>,
        responder: Responder<MemoryConnection>,
        blocked_sent: bool,
    },
    Delete {
        name: String,
        responder: Responder<Deletion>,
        blocked_sent: bool,
    },
}

impl Pending {
    fn database(&self) -> &str {
        match self {
            Pending::Open { name, .. } | Pending::Delete { name, .. } => name,
        }
    }

    fn is_abandoned(&self) -> bool {
        match self {
            Pending::Open { responder, .. } => responder.is_abandoned(),
            Pending::Delete { responder, .. } => responder.is_abandoned(),
        }
    }
}

impl EngineState {
    fn open_connections(&self, name: &str) -> usize {
        self.connections.values().filter(|db| *db == name).count()
    }

    fn stored_version(&self, name: &str) -> u32 {
        self.databases.get(name).map(|db| db.version).unwrap_or(0)
    }

    /// Run a request now, or queue it behind earlier requests for the same
    /// database.
    fn dispatch(&mut self, shared: &Arc<Mutex<EngineState>>, request: Pending) {
        if self.pending.iter().any(|p| p.database() == request.database()) {
            self.pending.push(request);
            return;
        }
        if let Some(waiting) = self.try_run(shared, request) {
            self.pending.push(waiting);
        }
    }

    /// Retry queued requests after a connection closed.
    fn drain(&mut self, shared: &Arc<Mutex<EngineState>>) {
        let queue = std::mem::take(&mut self.pending);
        let mut still_blocked = BTreeSet::new();
        let mut waiting = Vec::new();
        for request in queue {
            if still_blocked.contains(request.database()) {
                waiting.push(request);
                continue;
            }
            if let Some(request) = self.try_run(shared, request) {
                still_blocked.insert(request.database().to_string());
                waiting.push(request);
            }
        }
        self.pending = waiting;
    }

    /// Returns the request back if it has to keep waiting.
    fn try_run(&mut self, shared: &Arc<Mutex<EngineState>>, request: Pending) -> Option<Pending> {
        if request.is_abandoned() {
            debug!(database = %request.database(), "request abandoned by its caller");
            return None;
        }
        match request {
            Pending::Open {
                name,
                version,
                handler,
                responder,
                blocked_sent,
            } => {
                let current = self.stored_version(&name);
                let requested = version.unwrap_or(current.max(1));
                if requested < current {
                    responder.fail(HostError::new(
                        HostErrorKind::Version,
                        format!(
                            "the requested version ({requested}) is less than the existing version ({current})"
                        ),
                    ));
                    return None;
                }
                if requested > current && self.open_connections(&name) > 0 {
                    if !blocked_sent {
                        debug!(database = %name, current, requested, "open blocked");
                        responder.blocked(current, Some(requested));
                    }
                    return Some(Pending::Open {
                        name,
                        version,
                        handler,
                        responder,
                        blocked_sent: true,
                    });
                }

                let id = self.next_connection;
                self.next_connection += 1;
                self.connections.insert(id, name.clone());
                let conn = MemoryConnection {
                    id,
                    name: name.clone(),
                    version: requested,
                    shared: Arc::clone(shared),
                };
                if requested == current {
                    if !responder.succeed(conn) {
                        self.connections.remove(&id);
                    }
                    return None;
                }

                let mut tx = MemoryVersionChange {
                    database: name.clone(),
                    old_version: current,
                    new_version: requested,
                    stores: StoreSet::writable(
                        self.databases
                            .get(&name)
                            .map(|db| db.stores.clone())
                            .unwrap_or_default(),
                    ),
                    closed: false,
                };
                let outcome = match handler {
                    Some(handler) => handler(&mut tx),
                    None => Ok(()),
                };
                match outcome {
                    // The engine stays locked, so the caller cannot touch the
                    // connection before the commit below.
                    Ok(()) if !tx.closed => {
                        if responder.succeed(conn) {
                            debug!(database = %name, from = current, to = requested, "version change committed");
                            self.databases.insert(
                                name,
                                Database {
                                    version: requested,
                                    stores: tx.stores.stores,
                                },
                            );
                        } else {
                            debug!(database = %name, "caller gone, version change rolled back");
                            self.connections.remove(&id);
                        }
                    }
                    Ok(()) => {
                        self.connections.remove(&id);
                        responder.fail(HostError::abort(
                            "the connection was closed during the version change",
                        ));
                    }
                    Err(e) => {
                        debug!(database = %name, error = %e, "version change aborted");
                        self.connections.remove(&id);
                        responder.fail(e);
                    }
                }
                None
            }
            Pending::Delete {
                name,
                responder,
                blocked_sent,
            } => {
                if self.open_connections(&name) > 0 {
                    if !blocked_sent {
                        // Deletions report the zero version as their target,
                        // the way some engines do; callers normalise it.
                        responder.blocked(self.stored_version(&name), Some(0));
                    }
                    return Some(Pending::Delete {
                        name,
                        responder,
                        blocked_sent: true,
                    });
                }
                let old_version = self.databases.remove(&name).map(|db| db.version).unwrap_or(0);
                debug!(database = %name, old_version, "database deleted");
                let delivered = responder.succeed(Deletion {
                    old_version,
                    new_version: None,
                });
                if !delivered {
                    debug!(database = %name, "deletion finished with nobody waiting");
                }
                None
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Database {
    version: u32,
    stores: BTreeMap<String, StoreData>,
}

#[derive(Debug, Clone)]
struct IndexData {
    key_path: KeyPath,
    unique: bool,
    multi_entry: bool,
}

impl IndexData {
    fn keys_of(&self, record: &Value) -> Vec<Key> {
        match self.key_path.extract(record) {
            Some(Key::Array(mut items)) if self.multi_entry => {
                items.sort();
                items.dedup();
                items
            }
            Some(key) => vec![key],
            None => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct StoreData {
    key_path: Option<KeyPath>,
    auto_increment: bool,
    next_key: u64,
    records: BTreeMap<Key, Value>,
    indexes: BTreeMap<String, IndexData>,
}

impl StoreData {
    fn new(params: &StoreParams) -> Self {
        Self {
            key_path: params.key_path.clone(),
            auto_increment: params.auto_increment,
            next_key: 1,
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    fn info(&self, name: &str) -> StoreInfo {
        StoreInfo {
            name: name.to_string(),
            key_path: self.key_path.clone(),
            auto_increment: self.auto_increment,
            indexes: self
                .indexes
                .iter()
                .map(|(index_name, index)| IndexInfo {
                    name: index_name.clone(),
                    key_path: index.key_path.clone(),
                    unique: index.unique,
                    multi_entry: index.multi_entry,
                })
                .collect(),
        }
    }

    fn generate_key(&mut self) -> Key {
        let key = Key::from(self.next_key);
        self.next_key += 1;
        key
    }

    fn observe_key(&mut self, key: &Key) {
        if let (true, Key::Number(n)) = (self.auto_increment, key) {
            if *n >= self.next_key as f64 {
                self.next_key = n.floor() as u64 + 1;
            }
        }
    }

    fn resolve_key(&mut self, record: &mut Value, key: Option<Key>) -> Result<Key, HostError> {
        match (self.key_path.clone(), key) {
            (Some(_), Some(_)) => Err(HostError::data(
                "the store uses in-line keys and an explicit key was given",
            )),
            (Some(path), None) => match path.extract(record) {
                Some(key) => {
                    self.observe_key(&key);
                    Ok(key)
                }
                None if self.auto_increment => {
                    let key = self.generate_key();
                    if path.inject(record, &key) {
                        Ok(key)
                    } else {
                        Err(HostError::data(format!(
                            "a generated key could not be written at {path}"
                        )))
                    }
                }
                None => Err(HostError::data(format!("the record has no valid key at {path}"))),
            },
            (None, Some(key)) => {
                self.observe_key(&key);
                Ok(key)
            }
            (None, None) if self.auto_increment => Ok(self.generate_key()),
            (None, None) => Err(HostError::data(
                "the store uses out-of-line keys and no key was given",
            )),
        }
    }

    fn check_unique(&self, key: &Key, record: &Value) -> Result<(), HostError> {
        for (name, index) in self.indexes.iter().filter(|(_, i)| i.unique) {
            let candidate = index.keys_of(record);
            if candidate.is_empty() {
                continue;
            }
            for (other_key, other) in &self.records {
                if other_key == key {
                    continue;
                }
                if let Some(dup) = index.keys_of(other).into_iter().find(|k| candidate.contains(k)) {
                    return Err(HostError::constraint(format!(
                        "unique index \"{name}\" already contains {dup}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn insert(
        &mut self,
        mut record: Value,
        key: Option<Key>,
        overwrite: bool,
    ) -> Result<Key, HostError> {
        let key = self.resolve_key(&mut record, key)?;
        if !overwrite && self.records.contains_key(&key) {
            return Err(HostError::constraint(format!("key {key} already exists")));
        }
        self.check_unique(&key, &record)?;
        self.records.insert(key.clone(), record);
        Ok(key)
    }
}

// ── Transactions ────────────────────────────────────────────────────

/// A working copy of some stores; committed by swapping it back in.
struct StoreSet {
    stores: BTreeMap<String, StoreData>,
    writable: bool,
}

impl StoreSet {
    fn writable(stores: BTreeMap<String, StoreData>) -> Self {
        Self {
            stores,
            writable: true,
        }
    }

    fn store(&self, name: &str) -> Result<&StoreData, HostError> {
        self.stores
            .get(name)
            .ok_or_else(|| HostError::not_found(format!("no object store named \"{name}\"")))
    }

    fn store_mut(&mut self, name: &str) -> Result<&mut StoreData, HostError> {
        if !self.writable {
            return Err(HostError::new(
                HostErrorKind::ReadOnly,
                "the transaction is read-only",
            ));
        }
        self.stores
            .get_mut(name)
            .ok_or_else(|| HostError::not_found(format!("no object store named \"{name}\"")))
    }
}

impl RecordOps for StoreSet {
    fn get(&self, store: &str, key: &Key) -> Result<Option<Value>, HostError> {
        Ok(self.store(store)?.records.get(key).cloned())
    }

    fn get_all(&self, store: &str) -> Result<Vec<Value>, HostError> {
        Ok(self.store(store)?.records.values().cloned().collect())
    }

    fn entries(&self, store: &str) -> Result<Vec<(Key, Value)>, HostError> {
        Ok(self
            .store(store)?
            .records
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn count(&self, store: &str) -> Result<u64, HostError> {
        Ok(self.store(store)?.records.len() as u64)
    }

    fn add(&mut self, store: &str, record: Value, key: Option<Key>) -> Result<Key, HostError> {
        self.store_mut(store)?.insert(record, key, false)
    }

    fn put(&mut self, store: &str, record: Value, key: Option<Key>) -> Result<Key, HostError> {
        self.store_mut(store)?.insert(record, key, true)
    }

    fn delete(&mut self, store: &str, key: &Key) -> Result<(), HostError> {
        self.store_mut(store)?.records.remove(key);
        Ok(())
    }
}

struct MemoryVersionChange {
    database: String,
    old_version: u32,
    new_version: u32,
    stores: StoreSet,
    closed: bool,
}

impl RecordOps for MemoryVersionChange {
    fn get(&self, store: &str, key: &Key) -> Result<Option<Value>, HostError> {
        self.stores.get(store, key)
    }

    fn get_all(&self, store: &str) -> Result<Vec<Value>, HostError> {
        self.stores.get_all(store)
    }

    fn entries(&self, store: &str) -> Result<Vec<(Key, Value)>, HostError> {
        self.stores.entries(store)
    }

    fn count(&self, store: &str) -> Result<u64, HostError> {
        self.stores.count(store)
    }

    fn add(&mut self, store: &str, record: Value, key: Option<Key>) -> Result<Key, HostError> {
        self.stores.add(store, record, key)
    }

    fn put(&mut self, store: &str, record: Value, key: Option<Key>) -> Result<Key, HostError> {
        self.stores.put(store, record, key)
    }

    fn delete(&mut self, store: &str, key: &Key) -> Result<(), HostError> {
        self.stores.delete(store, key)
    }
}

impl VersionChange for MemoryVersionChange {
    fn old_version(&self) -> u64 {
        u64::from(self.old_version)
    }

    fn new_version(&self) -> u32 {
        self.new_version
    }

    fn database(&self) -> &str {
        &self.database
    }

    fn store_names(&self) -> Vec<String> {
        self.stores.stores.keys().cloned().collect()
    }

    fn store_info(&self, store: &str) -> Option<StoreInfo> {
        self.stores.stores.get(store).map(|data| data.info(store))
    }

    fn create_object_store(&mut self, name: &str, params: &StoreParams) -> Result<(), HostError> {
        if self.stores.stores.contains_key(name) {
            return Err(HostError::constraint(format!(
                "an object store named \"{name}\" already exists"
            )));
        }
        if params.auto_increment
            && params
                .key_path
                .as_ref()
                .is_some_and(|p| p.is_empty_string() || p.is_compound())
        {
            return Err(HostError::new(
                HostErrorKind::InvalidAccess,
                "auto-increment needs a non-empty, non-compound key path",
            ));
        }
        self.stores
            .stores
            .insert(name.to_string(), StoreData::new(params));
        Ok(())
    }

    fn delete_object_store(&mut self, name: &str) -> Result<(), HostError> {
        self.stores
            .stores
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| HostError::not_found(format!("no object store named \"{name}\"")))
    }

    fn create_index(
        &mut self,
        store: &str,
        name: &str,
        key_path: &KeyPath,
        params: IndexParams,
    ) -> Result<(), HostError> {
        let data = self.stores.store_mut(store)?;
        if data.indexes.contains_key(name) {
            return Err(HostError::constraint(format!(
                "an index named \"{name}\" already exists on \"{store}\""
            )));
        }
        if params.multi_entry && key_path.is_compound() {
            return Err(HostError::new(
                HostErrorKind::InvalidAccess,
                "a multi-entry index cannot use a compound key path",
            ));
        }
        let index = IndexData {
            key_path: key_path.clone(),
            unique: params.unique,
            multi_entry: params.multi_entry,
        };
        if index.unique {
            let mut seen = BTreeSet::new();
            for record in data.records.values() {
                for key in index.keys_of(record) {
                    if !seen.insert(key.clone()) {
                        return Err(HostError::constraint(format!(
                            "existing records violate unique index \"{name}\" at {key}"
                        )));
                    }
                }
            }
        }
        data.indexes.insert(name.to_string(), index);
        Ok(())
    }

    fn delete_index(&mut self, store: &str, name: &str) -> Result<(), HostError> {
        self.stores
            .store_mut(store)?
            .indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| {
                HostError::not_found(format!("no index named \"{name}\" on \"{store}\""))
            })
    }

    fn close_connection(&mut self) {
        self.closed = true;
    }
}

// ── Connection ──────────────────────────────────────────────────────

/// A connection handed out by [`MemoryEngine`].
#[derive(Clone)]
pub struct MemoryConnection {
    id: u64,
    name: String,
    version: u32,
    shared: Arc<Mutex<EngineState>>,
}

impl fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .finish()
    }
}

impl MemoryConnection {
    fn stores_snapshot(&self) -> BTreeMap<String, StoreData> {
        lock(&self.shared)
            .databases
            .get(&self.name)
            .map(|db| db.stores.clone())
            .unwrap_or_default()
    }
}

impl Connection for MemoryConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn close(&self) {
        let mut state = lock(&self.shared);
        if state.connections.remove(&self.id).is_some() {
            debug!(database = %self.name, connection = self.id, "connection closed");
            state.drain(&self.shared);
        }
    }

    fn is_closed(&self) -> bool {
        !lock(&self.shared).connections.contains_key(&self.id)
    }

    fn store_names(&self) -> Vec<String> {
        self.stores_snapshot().into_keys().collect()
    }

    fn store_info(&self, store: &str) -> Option<StoreInfo> {
        self.stores_snapshot().get(store).map(|data| data.info(store))
    }

    /// Read-write transactions run with the engine locked, so they are
    /// serialized against each other and `f` must not call back into the
    /// engine.
    fn transaction<R, F>(&self, stores: &[&str], mode: TxMode, f: F) -> Result<R, HostError>
    where
        F: FnOnce(&mut dyn RecordOps) -> Result<R, HostError>,
    {
        let mut state = lock(&self.shared);
        if !state.connections.contains_key(&self.id) {
            return Err(HostError::new(
                HostErrorKind::InvalidState,
                "the connection is closed",
            ));
        }
        let db = state.databases.get(&self.name);
        let mut scoped = BTreeMap::new();
        for &store in stores {
            let data = db.and_then(|db| db.stores.get(store)).ok_or_else(|| {
                HostError::not_found(format!("no object store named \"{store}\""))
            })?;
            scoped.insert(store.to_string(), data.clone());
        }

        let mut set = StoreSet {
            stores: scoped,
            writable: mode == TxMode::ReadWrite,
        };
        if mode == TxMode::ReadOnly {
            drop(state);
            return f(&mut set);
        }

        let result = f(&mut set)?;
        let db = state.databases.get_mut(&self.name).ok_or_else(|| {
            HostError::abort(format!("database \"{}\" no longer exists", self.name))
        })?;
        db.stores.extend(set.stores);
        Ok(result)
    }
}
