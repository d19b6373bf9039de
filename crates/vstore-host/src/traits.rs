use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HostError;
use crate::key::{Key, KeyPath};
use crate::request::{Deletion, Request};

/// Parameters for `createObjectStore`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreParams {
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
}

/// Parameters for `createIndex`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParams {
    pub unique: bool,
    pub multi_entry: bool,
}

/// Description of an index as the host reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub key_path: KeyPath,
    pub unique: bool,
    pub multi_entry: bool,
}

/// Description of an object store as the host reports it.
///
/// This is the "live store handle" a schema model can reflect when it has to
/// pick up a store it did not create itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub name: String,
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
    /// Sorted by index name.
    pub indexes: Vec<IndexInfo>,
}

impl StoreInfo {
    pub fn index_names(&self) -> Vec<String> {
        self.indexes.iter().map(|i| i.name.clone()).collect()
    }
}

/// Access mode of a data transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

/// Record-level operations available inside any transaction.
pub trait RecordOps {
    /// Look up a record by primary key.
    fn get(&self, store: &str, key: &Key) -> Result<Option<Value>, HostError>;

    /// All records of a store in key order.
    fn get_all(&self, store: &str) -> Result<Vec<Value>, HostError>;

    /// All `(key, record)` pairs of a store in key order.
    fn entries(&self, store: &str) -> Result<Vec<(Key, Value)>, HostError>;

    /// Number of records in a store.
    fn count(&self, store: &str) -> Result<u64, HostError>;

    /// Insert a record; fails with a constraint error if the key exists.
    ///
    /// `key` must be `None` for stores with an in-line key path.
    fn add(&mut self, store: &str, record: Value, key: Option<Key>) -> Result<Key, HostError>;

    /// Insert or overwrite a record.
    fn put(&mut self, store: &str, record: Value, key: Option<Key>) -> Result<Key, HostError>;

    /// Remove a record by primary key.
    fn delete(&mut self, store: &str, key: &Key) -> Result<(), HostError>;
}

/// The active version-change transaction handed to an upgrade handler.
///
/// Structural operations are only legal here. Everything done through this
/// trait commits together when the handler returns `Ok`, and is discarded
/// when it returns `Err`.
pub trait VersionChange: RecordOps {
    /// Version stored before this upgrade (0 for a new database).
    fn old_version(&self) -> u64;

    /// Version being upgraded to.
    fn new_version(&self) -> u32;

    /// Name of the database being upgraded.
    fn database(&self) -> &str;

    /// Sorted store names as seen by this transaction.
    fn store_names(&self) -> Vec<String>;

    fn store_info(&self, store: &str) -> Option<StoreInfo>;

    fn create_object_store(&mut self, name: &str, params: &StoreParams) -> Result<(), HostError>;

    fn delete_object_store(&mut self, name: &str) -> Result<(), HostError>;

    fn create_index(
        &mut self,
        store: &str,
        name: &str,
        key_path: &KeyPath,
        params: IndexParams,
    ) -> Result<(), HostError>;

    fn delete_index(&mut self, store: &str, name: &str) -> Result<(), HostError>;

    /// Close the connection this upgrade belongs to. The transaction aborts
    /// once the handler returns.
    fn close_connection(&mut self);
}

/// Handler invoked synchronously with the version-change event.
pub type UpgradeHandler = Box<dyn FnOnce(&mut dyn VersionChange) -> Result<(), HostError> + Send>;

/// An open connection to a database.
///
/// Connections are cheap handles; clones refer to the same underlying
/// connection and closing any clone closes all of them.
pub trait Connection: Clone + Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Version the connection was opened at.
    fn version(&self) -> u32;

    /// Close the connection. Closing twice is a no-op.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Sorted store names.
    fn store_names(&self) -> Vec<String>;

    fn store_info(&self, store: &str) -> Option<StoreInfo>;

    /// Run `f` inside a transaction scoped to `stores`.
    ///
    /// All writes made by `f` commit atomically if it returns `Ok`; none of
    /// them are kept if it returns `Err`.
    fn transaction<R, F>(&self, stores: &[&str], mode: TxMode, f: F) -> Result<R, HostError>
    where
        F: FnOnce(&mut dyn RecordOps) -> Result<R, HostError>;
}

/// A host storage engine.
pub trait StorageEngine: Send + Sync + 'static {
    type Conn: Connection;

    /// Issue an open request. With `version = None` the database opens at
    /// its stored version (creating it at version 1 if it does not exist).
    fn open(
        &self,
        name: &str,
        version: Option<u32>,
        on_upgrade: Option<UpgradeHandler>,
    ) -> Request<Self::Conn>;

    /// Issue a delete request.
    fn delete_database(&self, name: &str) -> Request<Deletion>;

    /// The host's key ordering.
    fn cmp(&self, a: &Key, b: &Key) -> Ordering;
}
