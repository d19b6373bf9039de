use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::ops::Bound;

use serde::{Deserialize, Serialize};
use vstore_host::{KeyPath, StoreInfo};

use crate::callback::{BoxError, Callback, EarlyCallback};
use crate::early::EarlyContext;
use crate::error::SchemaError;

// ── Definitions ─────────────────────────────────────────────────────

/// Options for a new store.
///
/// For a copy, unset fields fall back to the source store's settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOptions {
    pub key_path: Option<KeyPath>,
    pub auto_increment: Option<bool>,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a store keyed in-line at `path`.
    pub fn keyed(path: impl Into<KeyPath>) -> Self {
        Self::new().key_path(path)
    }

    pub fn key_path(mut self, path: impl Into<KeyPath>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn auto_increment(mut self, on: bool) -> Self {
        self.auto_increment = Some(on);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    pub unique: bool,
    pub multi_entry: bool,
}

impl IndexOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unique(mut self, on: bool) -> Self {
        self.unique = on;
        self
    }

    pub fn multi_entry(mut self, on: bool) -> Self {
        self.multi_entry = on;
        self
    }
}

/// Where a new store takes its initial content from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyFrom {
    pub source: String,
    pub delete_source: bool,
    /// Overrides for the copy's key settings, as given by the caller.
    pub source_options: StoreOptions,
    /// Whether the model defined the source when the copy was declared. If
    /// so, the target's settings and indexes come from the model; otherwise
    /// they are read off the host's source store.
    #[serde(default)]
    pub source_known: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDef {
    pub name: String,
    /// Owning store.
    pub store: String,
    pub field: KeyPath,
    pub unique: bool,
    pub multi_entry: bool,
}

/// A store as the model currently knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDef {
    pub name: String,
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
    pub copy_from: Option<CopyFrom>,
    pub indexes: BTreeMap<String, IndexDef>,
}

impl StoreDef {
    /// A definition mirroring a store as the host reports it.
    pub fn from_info(info: &StoreInfo) -> Self {
        let indexes = info
            .indexes
            .iter()
            .map(|index| {
                let def = IndexDef {
                    name: index.name.clone(),
                    store: info.name.clone(),
                    field: index.key_path.clone(),
                    unique: index.unique,
                    multi_entry: index.multi_entry,
                };
                (index.name.clone(), def)
            })
            .collect();
        Self {
            name: info.name.clone(),
            key_path: info.key_path.clone(),
            auto_increment: info.auto_increment,
            copy_from: None,
            indexes,
        }
    }

    /// Validate and register a new index on this store.
    pub(crate) fn define_index(
        &mut self,
        name: &str,
        field: KeyPath,
        options: IndexOptions,
    ) -> Result<IndexDef, SchemaError> {
        if name.is_empty() {
            return Err(SchemaError::MissingIndexName);
        }
        let empty = match &field {
            KeyPath::Single(path) => path.is_empty(),
            KeyPath::Compound(parts) => parts.is_empty(),
        };
        if empty {
            return Err(SchemaError::MissingIndexField(name.to_string()));
        }
        if self.indexes.contains_key(name) {
            return Err(SchemaError::IndexExists {
                store: self.name.clone(),
                index: name.to_string(),
            });
        }
        let index = IndexDef {
            name: name.to_string(),
            store: self.name.clone(),
            field,
            unique: options.unique,
            multi_entry: options.multi_entry,
        };
        self.indexes.insert(name.to_string(), index.clone());
        Ok(index)
    }

    /// Unregister an index, returning the definition it had.
    pub(crate) fn remove_index(&mut self, name: &str) -> Result<IndexDef, SchemaError> {
        if name.is_empty() {
            return Err(SchemaError::MissingIndexName);
        }
        self.indexes
            .remove(name)
            .ok_or_else(|| SchemaError::IndexNotDefined {
                store: self.name.clone(),
                index: name.to_string(),
            })
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            name: self.name.clone(),
            key_path: self.key_path.clone(),
            auto_increment: self.auto_increment,
            copy_from: self.copy_from.clone(),
            indexes: self
                .indexes
                .values()
                .map(|index| IndexSnapshot {
                    name: index.name.clone(),
                    field: index.field.clone(),
                    unique: index.unique,
                    multi_entry: index.multi_entry,
                })
                .collect(),
        }
    }
}

/// Detached copy of a store definition, as returned by
/// [`SchemaModel::stores`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub name: String,
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
    pub copy_from: Option<CopyFrom>,
    pub indexes: Vec<IndexSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSnapshot {
    pub name: String,
    pub field: KeyPath,
    pub unique: bool,
    pub multi_entry: bool,
}

// ── Version deltas ──────────────────────────────────────────────────

/// Record dropping `index`. An index added earlier in the same version is
/// simply never created.
pub(crate) fn record_index_drop(
    added: &mut Vec<IndexDef>,
    dropped: &mut Vec<IndexDef>,
    index: IndexDef,
) {
    let pending = added
        .iter()
        .position(|i| i.store == index.store && i.name == index.name);
    match pending {
        Some(pos) => {
            added.remove(pos);
        }
        None => dropped.push(index),
    }
}

/// Everything one version changes, in the order it was declared.
pub struct VersionDelta<C> {
    version: u32,
    added_stores: Vec<StoreDef>,
    dropped_stores: Vec<String>,
    added_indexes: Vec<IndexDef>,
    dropped_indexes: Vec<IndexDef>,
    callbacks: Vec<Callback<C>>,
    early_callbacks: Vec<EarlyCallback>,
}

impl<C> VersionDelta<C> {
    fn new(version: u32) -> Self {
        Self {
            version,
            added_stores: Vec::new(),
            dropped_stores: Vec::new(),
            added_indexes: Vec::new(),
            dropped_indexes: Vec::new(),
            callbacks: Vec::new(),
            early_callbacks: Vec::new(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Stores created by this version. Index sets are as of creation.
    pub fn added_stores(&self) -> &[StoreDef] {
        &self.added_stores
    }

    pub fn dropped_stores(&self) -> &[String] {
        &self.dropped_stores
    }

    pub fn added_indexes(&self) -> &[IndexDef] {
        &self.added_indexes
    }

    /// Dropped indexes, with the definition they had before the drop.
    pub fn dropped_indexes(&self) -> &[IndexDef] {
        &self.dropped_indexes
    }

    pub fn callbacks(&self) -> &[Callback<C>] {
        &self.callbacks
    }

    pub fn early_callbacks(&self) -> &[EarlyCallback] {
        &self.early_callbacks
    }

    /// `true` when applying this version touches nothing.
    pub fn is_empty(&self) -> bool {
        self.added_stores.is_empty()
            && self.dropped_stores.is_empty()
            && self.added_indexes.is_empty()
            && self.dropped_indexes.is_empty()
            && self.callbacks.is_empty()
            && self.early_callbacks.is_empty()
    }

    /// Stores that exist before this version and are gone once its
    /// structural changes ran: drops and sources of moves.
    pub fn vacated_stores(&self) -> Vec<&str> {
        let moved = self
            .added_stores
            .iter()
            .filter_map(|s| s.copy_from.as_ref())
            .filter(|copy| copy.delete_source)
            .map(|copy| copy.source.as_str());
        self.dropped_stores
            .iter()
            .map(String::as_str)
            .chain(moved)
            .collect()
    }

    /// Whether `name` feeds a copy declared in this version.
    fn copy_target_of(&self, name: &str) -> Option<&StoreDef> {
        self.added_stores
            .iter()
            .find(|s| s.copy_from.as_ref().is_some_and(|c| c.source == name))
    }

    /// Discard pending index changes on a store that goes away.
    fn forget_indexes_of(&mut self, store: &str) {
        self.added_indexes.retain(|i| i.store != store);
        self.dropped_indexes.retain(|i| i.store != store);
    }
}

impl<C> Clone for VersionDelta<C> {
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            added_stores: self.added_stores.clone(),
            dropped_stores: self.dropped_stores.clone(),
            added_indexes: self.added_indexes.clone(),
            dropped_indexes: self.dropped_indexes.clone(),
            callbacks: self.callbacks.clone(),
            early_callbacks: self.early_callbacks.clone(),
        }
    }
}

impl<C> fmt::Debug for VersionDelta<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionDelta")
            .field("version", &self.version)
            .field("added_stores", &self.added_stores)
            .field("dropped_stores", &self.dropped_stores)
            .field("added_indexes", &self.added_indexes)
            .field("dropped_indexes", &self.dropped_indexes)
            .field("callbacks", &self.callbacks.len())
            .field("early_callbacks", &self.early_callbacks.len())
            .finish()
    }
}

// ── Model ───────────────────────────────────────────────────────────

/// A versioned schema: ordered per-version deltas plus the live view of
/// the stores they add up to.
///
/// Building is pure and synchronous. `C` is the connection type callbacks
/// receive.
///
/// # Example
///
/// ```
/// use vstore_schema::{IndexOptions, SchemaModel, StoreOptions};
///
/// # fn main() -> Result<(), vstore_schema::SchemaError> {
/// let mut schema: SchemaModel<()> = SchemaModel::new();
/// schema
///     .add_store("books", StoreOptions::keyed("isbn"))?
///     .add_index("byTitle", "title", IndexOptions::new().unique(true))?;
/// schema.version(2)?.rename_store("books", "literature", StoreOptions::new())?;
///
/// let stores = schema.stores();
/// assert_eq!(stores.len(), 1);
/// assert_eq!(stores[0].name, "literature");
/// assert_eq!(stores[0].indexes[0].name, "byTitle");
/// # Ok(())
/// # }
/// ```
pub struct SchemaModel<C> {
    deltas: BTreeMap<u32, VersionDelta<C>>,
    stores: BTreeMap<String, StoreDef>,
    last_entered: u32,
}

impl<C> SchemaModel<C> {
    /// A model positioned at an empty version 1.
    pub fn new() -> Self {
        let mut deltas = BTreeMap::new();
        deltas.insert(1, VersionDelta::new(1));
        Self {
            deltas,
            stores: BTreeMap::new(),
            last_entered: 1,
        }
    }

    /// Start (or continue) the delta for `version`.
    pub fn version(&mut self, version: u32) -> Result<&mut Self, SchemaError> {
        if version == 0 {
            return Err(SchemaError::InvalidVersion(0));
        }
        if version < self.last_entered {
            return Err(SchemaError::VersionNotIncreasing {
                requested: version,
                last: self.last_entered,
            });
        }
        self.deltas
            .entry(version)
            .or_insert_with(|| VersionDelta::new(version));
        self.last_entered = version;
        Ok(self)
    }

    fn current(&mut self) -> &mut VersionDelta<C> {
        let version = self.last_entered;
        self.deltas
            .entry(version)
            .or_insert_with(|| VersionDelta::new(version))
    }

    /// Add a store to the current version and select it.
    pub fn add_store(
        &mut self,
        name: &str,
        options: StoreOptions,
    ) -> Result<StoreHandle<'_, C>, SchemaError> {
        self.insert_store(name, options, None)
    }

    /// Add `new` as a copy of `old`'s content, optionally deleting `old`
    /// once the content has moved.
    pub fn copy_store(
        &mut self,
        old: &str,
        new: &str,
        options: StoreOptions,
        delete_old: bool,
    ) -> Result<StoreHandle<'_, C>, SchemaError> {
        let copy = CopyFrom {
            source: old.to_string(),
            delete_source: delete_old,
            source_options: options.clone(),
            source_known: self.stores.contains_key(old),
        };
        self.insert_store(new, options, Some(copy))
    }

    /// Move `old`'s content to a new store called `new`.
    pub fn rename_store(
        &mut self,
        old: &str,
        new: &str,
        options: StoreOptions,
    ) -> Result<StoreHandle<'_, C>, SchemaError> {
        self.copy_store(old, new, options, true)
    }

    fn insert_store(
        &mut self,
        name: &str,
        options: StoreOptions,
        copy: Option<CopyFrom>,
    ) -> Result<StoreHandle<'_, C>, SchemaError> {
        if name.is_empty() {
            return Err(SchemaError::MissingStoreName);
        }
        if self.stores.contains_key(name) {
            return Err(SchemaError::StoreExists(name.to_string()));
        }

        let mut key_path = options.key_path.clone();
        let mut auto_increment = options.auto_increment.unwrap_or(false);
        let mut indexes = BTreeMap::new();

        if let Some(copy) = &copy {
            if copy.source.is_empty() {
                return Err(SchemaError::MissingCopySource);
            }
            let delta = self.current();
            if delta.dropped_stores.iter().any(|s| *s == copy.source) {
                return Err(SchemaError::CopySourceDeleted(copy.source.clone()));
            }
            if delta.added_stores.iter().any(|s| s.name == copy.source) {
                return Err(SchemaError::CopySourceAdded(copy.source.clone()));
            }
            // Untracked sources may exist on the host already; the host's
            // settings are used for them when the copy is applied.
            if let Some(source) = self.stores.get(&copy.source) {
                if key_path.is_none() {
                    key_path = source.key_path.clone();
                }
                if options.auto_increment.is_none() {
                    auto_increment = source.auto_increment;
                }
                indexes = source
                    .indexes
                    .values()
                    .map(|index| {
                        let mut index = index.clone();
                        index.store = name.to_string();
                        (index.name.clone(), index)
                    })
                    .collect();
            }
        }

        if auto_increment
            && key_path
                .as_ref()
                .is_some_and(|p| p.is_empty_string() || p.is_compound())
        {
            return Err(SchemaError::InvalidAutoIncrement(name.to_string()));
        }

        if let Some(copy) = &copy {
            if copy.delete_source {
                self.stores.remove(&copy.source);
                // The target was given the source's indexes as they stand
                // now, so changes queued for the source are already in it.
                self.current().forget_indexes_of(&copy.source);
            }
        }

        let def = StoreDef {
            name: name.to_string(),
            key_path,
            auto_increment,
            copy_from: copy,
            indexes,
        };
        self.current().added_stores.push(def.clone());
        self.stores.insert(name.to_string(), def);
        Ok(StoreHandle {
            model: self,
            store: name.to_string(),
        })
    }

    /// Drop a store in the current version.
    ///
    /// Names the model does not track are accepted: the store may have been
    /// created outside the model.
    pub fn del_store(&mut self, name: &str) -> Result<&mut Self, SchemaError> {
        if name.is_empty() {
            return Err(SchemaError::MissingStoreName);
        }
        let copy = self.current().copy_target_of(name).map(|target| {
            let moved = target.copy_from.as_ref().is_some_and(|c| c.delete_source);
            (target.name.clone(), moved)
        });
        if let Some((target, moved)) = copy {
            let store = name.to_string();
            return Err(if moved {
                SchemaError::StoreIsMovedSource { store, target }
            } else {
                SchemaError::StoreIsCopySource { store, target }
            });
        }
        self.stores.remove(name);
        let delta = self.current();
        delta.forget_indexes_of(name);
        match delta.added_stores.iter().position(|s| s.name == name) {
            // Added in this same version: never create it.
            Some(pos) => {
                let added = delta.added_stores.remove(pos);
                if let Some(copy) = added.copy_from.filter(|c| c.delete_source) {
                    // The move still vacates its source.
                    delta.dropped_stores.push(copy.source);
                }
            }
            None => {
                if !delta.dropped_stores.iter().any(|s| s == name) {
                    delta.dropped_stores.push(name.to_string());
                }
            }
        }
        Ok(self)
    }

    /// Select an existing store.
    pub fn get_store(&mut self, name: &str) -> Result<StoreHandle<'_, C>, SchemaError> {
        if name.is_empty() {
            return Err(SchemaError::MissingStoreName);
        }
        if !self.stores.contains_key(name) {
            return Err(SchemaError::StoreNotDefined(name.to_string()));
        }
        Ok(StoreHandle {
            model: self,
            store: name.to_string(),
        })
    }

    /// Pick up a store as the host reports it and select it. Replaces any
    /// definition the model had under that name.
    pub fn reflect_store(&mut self, info: &StoreInfo) -> Result<StoreHandle<'_, C>, SchemaError> {
        if info.name.is_empty() {
            return Err(SchemaError::MissingStoreName);
        }
        self.stores
            .insert(info.name.clone(), StoreDef::from_info(info));
        Ok(StoreHandle {
            model: self,
            store: info.name.clone(),
        })
    }

    /// Run `f` against the open connection once the current version has
    /// committed.
    pub fn add_callback<F>(&mut self, f: F) -> &mut Self
    where
        C: 'static,
        F: Fn(&C) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.current().callbacks.push(Callback::sync(f));
        self
    }

    /// Like [`add_callback`](Self::add_callback), for work that finishes
    /// later. Later callbacks of the same version wait for it.
    pub fn add_async_callback<F, Fut>(&mut self, f: F) -> &mut Self
    where
        C: Clone + 'static,
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.current().callbacks.push(Callback::pending(f));
        self
    }

    /// Append a prebuilt callback.
    pub fn push_callback(&mut self, callback: Callback<C>) -> &mut Self {
        self.current().callbacks.push(callback);
        self
    }

    /// Run `f` inside the version-change transaction, before the current
    /// version's structural changes. See [`EarlyContext`] for what it can
    /// do there.
    pub fn add_early_callback<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut EarlyContext<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.current().early_callbacks.push(EarlyCallback::new(f));
        self
    }

    // ── Reading ─────────────────────────────────────────────────────

    /// Highest defined version.
    pub fn latest_version(&self) -> u32 {
        self.deltas
            .keys()
            .next_back()
            .copied()
            .unwrap_or(self.last_entered)
    }

    pub fn last_entered_version(&self) -> u32 {
        self.last_entered
    }

    /// All deltas in ascending version order.
    pub fn deltas(&self) -> impl Iterator<Item = &VersionDelta<C>> {
        self.deltas.values()
    }

    pub fn delta(&self, version: u32) -> Option<&VersionDelta<C>> {
        self.deltas.get(&version)
    }

    /// The first delta strictly above `version`.
    pub fn next_delta_after(&self, version: u32) -> Option<&VersionDelta<C>> {
        self.deltas
            .range((Bound::Excluded(version), Bound::Unbounded))
            .next()
            .map(|(_, delta)| delta)
    }

    /// The highest delta at or below `version`.
    pub fn delta_at_or_before(&self, version: u32) -> Option<&VersionDelta<C>> {
        self.deltas
            .range(..=version)
            .next_back()
            .map(|(_, delta)| delta)
    }

    pub fn store(&self, name: &str) -> Option<&StoreDef> {
        self.stores.get(name)
    }

    /// Snapshot of the live stores, sorted by name.
    pub fn stores(&self) -> Vec<StoreSnapshot> {
        self.stores.values().map(StoreDef::snapshot).collect()
    }
}

impl<C> Default for SchemaModel<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Clone for SchemaModel<C> {
    fn clone(&self) -> Self {
        Self {
            deltas: self.deltas.clone(),
            stores: self.stores.clone(),
            last_entered: self.last_entered,
        }
    }
}

impl<C> fmt::Debug for SchemaModel<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaModel")
            .field("last_entered", &self.last_entered)
            .field("deltas", &self.deltas)
            .field("stores", &self.stores)
            .finish()
    }
}

// ── Store handle ────────────────────────────────────────────────────

/// A selected store. Index operations live here, so they always have a
/// store to act on.
pub struct StoreHandle<'a, C> {
    model: &'a mut SchemaModel<C>,
    store: String,
}

impl<'a, C> StoreHandle<'a, C> {
    pub fn name(&self) -> &str {
        &self.store
    }

    /// The store's current definition.
    pub fn def(&self) -> Option<&StoreDef> {
        self.model.stores.get(&self.store)
    }

    fn def_mut(&mut self) -> Result<&mut StoreDef, SchemaError> {
        self.model
            .stores
            .get_mut(&self.store)
            .ok_or_else(|| SchemaError::StoreNotDefined(self.store.clone()))
    }

    pub fn add_index(
        mut self,
        name: &str,
        field: impl Into<KeyPath>,
        options: IndexOptions,
    ) -> Result<Self, SchemaError> {
        let index = self.def_mut()?.define_index(name, field.into(), options)?;
        self.model.current().added_indexes.push(index);
        Ok(self)
    }

    pub fn del_index(mut self, name: &str) -> Result<Self, SchemaError> {
        let index = self.def_mut()?.remove_index(name)?;
        let delta = self.model.current();
        record_index_drop(&mut delta.added_indexes, &mut delta.dropped_indexes, index);
        Ok(self)
    }

    /// Release the selection and continue with the model.
    pub fn into_model(self) -> &'a mut SchemaModel<C> {
        self.model
    }
}

impl<C> fmt::Debug for StoreHandle<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Model = SchemaModel<()>;

    fn library() -> Model {
        let mut schema = Model::new();
        schema
            .add_store("books", StoreOptions::keyed("isbn"))
            .unwrap()
            .add_index("byTitle", "title", IndexOptions::new().unique(true))
            .unwrap()
            .add_index("byAuthor", "author", IndexOptions::new())
            .unwrap();
        schema
    }

    #[test]
    fn new_model_starts_at_version_one() {
        let schema = Model::new();
        assert_eq!(schema.latest_version(), 1);
        assert_eq!(schema.last_entered_version(), 1);
        assert!(schema.delta(1).unwrap().is_empty());
    }

    #[test]
    fn version_validation() {
        let mut schema = Model::new();
        assert_eq!(schema.version(0).unwrap_err(), SchemaError::InvalidVersion(0));
        schema.version(3).unwrap();
        assert_eq!(
            schema.version(2).unwrap_err(),
            SchemaError::VersionNotIncreasing {
                requested: 2,
                last: 3
            }
        );
        // Re-entering the same version keeps appending to it.
        schema.version(3).unwrap().add_store("a", StoreOptions::new()).unwrap();
        schema.version(3).unwrap().add_store("b", StoreOptions::new()).unwrap();
        assert_eq!(schema.delta(3).unwrap().added_stores().len(), 2);
    }

    #[test]
    fn store_validation() {
        let mut schema = library();
        assert_eq!(
            schema.add_store("", StoreOptions::new()).unwrap_err(),
            SchemaError::MissingStoreName
        );
        assert_eq!(
            schema.add_store("books", StoreOptions::new()).unwrap_err(),
            SchemaError::StoreExists("books".into())
        );
        assert_eq!(
            schema.get_store("magazines").unwrap_err(),
            SchemaError::StoreNotDefined("magazines".into())
        );
        assert_eq!(
            schema
                .add_store("x", StoreOptions::keyed("").auto_increment(true))
                .unwrap_err(),
            SchemaError::InvalidAutoIncrement("x".into())
        );
        assert_eq!(
            schema
                .add_store("y", StoreOptions::keyed(["a", "b"]).auto_increment(true))
                .unwrap_err(),
            SchemaError::InvalidAutoIncrement("y".into())
        );
        // Out-of-line keys with a generator are fine.
        schema
            .add_store("z", StoreOptions::new().auto_increment(true))
            .unwrap();
    }

    #[test]
    fn index_validation() {
        let mut schema = library();
        assert_eq!(
            schema
                .get_store("books")
                .unwrap()
                .add_index("", "title", IndexOptions::new())
                .unwrap_err(),
            SchemaError::MissingIndexName
        );
        assert_eq!(
            schema
                .get_store("books")
                .unwrap()
                .add_index("byYear", "", IndexOptions::new())
                .unwrap_err(),
            SchemaError::MissingIndexField("byYear".into())
        );
        assert_eq!(
            schema
                .get_store("books")
                .unwrap()
                .add_index("byTitle", "title", IndexOptions::new())
                .unwrap_err(),
            SchemaError::IndexExists {
                store: "books".into(),
                index: "byTitle".into()
            }
        );
        assert_eq!(
            schema.get_store("books").unwrap().del_index("byField").unwrap_err(),
            SchemaError::IndexNotDefined {
                store: "books".into(),
                index: "byField".into()
            }
        );
    }

    #[test]
    fn del_index_keeps_pre_drop_definition() {
        let mut schema = library();
        schema
            .version(2)
            .unwrap()
            .get_store("books")
            .unwrap()
            .del_index("byTitle")
            .unwrap()
            .add_index("byTitle", "name", IndexOptions::new())
            .unwrap();
        let delta = schema.delta(2).unwrap();
        assert_eq!(delta.dropped_indexes()[0].field, KeyPath::from("title"));
        assert!(delta.dropped_indexes()[0].unique);
        assert_eq!(delta.added_indexes()[0].field, KeyPath::from("name"));
    }

    #[test]
    fn copy_source_rules() {
        let mut schema = library();
        schema.version(2).unwrap();
        schema.del_store("books").unwrap();
        assert_eq!(
            schema
                .copy_store("books", "archive", StoreOptions::new(), false)
                .unwrap_err(),
            SchemaError::CopySourceDeleted("books".into())
        );

        let mut schema = library();
        schema.version(2).unwrap();
        schema
            .copy_store("books", "archive", StoreOptions::new(), false)
            .unwrap();
        assert_eq!(
            schema.del_store("books").unwrap_err(),
            SchemaError::StoreIsCopySource {
                store: "books".into(),
                target: "archive".into()
            }
        );

        let mut schema = library();
        schema.version(2).unwrap();
        schema
            .rename_store("books", "literature", StoreOptions::new())
            .unwrap();
        assert_eq!(
            schema.del_store("books").unwrap_err(),
            SchemaError::StoreIsMovedSource {
                store: "books".into(),
                target: "literature".into()
            }
        );

        let mut schema = library();
        schema.version(2).unwrap();
        schema.add_store("fresh", StoreOptions::new()).unwrap();
        assert_eq!(
            schema
                .copy_store("fresh", "copy", StoreOptions::new(), false)
                .unwrap_err(),
            SchemaError::CopySourceAdded("fresh".into())
        );
    }

    #[test]
    fn rename_inherits_key_settings_and_indexes() {
        let mut schema = library();
        schema
            .version(2)
            .unwrap()
            .rename_store("books", "literature", StoreOptions::new())
            .unwrap();
        let stores = schema.stores();
        assert_eq!(stores.len(), 1);
        let literature = &stores[0];
        assert_eq!(literature.name, "literature");
        assert_eq!(literature.key_path, Some(KeyPath::from("isbn")));
        let names: Vec<_> = literature.indexes.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["byAuthor", "byTitle"]);
        assert_eq!(
            schema.store("literature").unwrap().indexes["byTitle"].store,
            "literature"
        );
    }

    #[test]
    fn copy_without_delete_keeps_both() {
        let mut schema = library();
        schema
            .version(2)
            .unwrap()
            .copy_store("books", "backup", StoreOptions::keyed("id"), false)
            .unwrap();
        let names: Vec<_> = schema.stores().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["backup", "books"]);
        assert_eq!(
            schema.store("backup").unwrap().key_path,
            Some(KeyPath::from("id"))
        );
    }

    #[test]
    fn moving_a_store_absorbs_its_pending_index_changes() {
        let mut schema = library();
        schema
            .version(2)
            .unwrap()
            .get_store("books")
            .unwrap()
            .add_index("byYear", "year", IndexOptions::new())
            .unwrap()
            .del_index("byAuthor")
            .unwrap();
        schema
            .rename_store("books", "literature", StoreOptions::new())
            .unwrap();

        let delta = schema.delta(2).unwrap();
        assert!(delta.added_indexes().is_empty());
        assert!(delta.dropped_indexes().is_empty());
        let target = &delta.added_stores()[0];
        let names: Vec<_> = target.indexes.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["byTitle", "byYear"]);
        assert!(target.copy_from.as_ref().unwrap().source_known);
        assert_eq!(delta.vacated_stores(), vec!["books"]);
    }

    #[test]
    fn copy_keeps_later_source_changes_to_the_source() {
        let mut schema = library();
        schema
            .version(2)
            .unwrap()
            .copy_store("books", "backup", StoreOptions::new(), false)
            .unwrap();
        schema
            .get_store("books")
            .unwrap()
            .add_index("byYear", "year", IndexOptions::new())
            .unwrap();
        let delta = schema.delta(2).unwrap();
        assert_eq!(delta.added_indexes()[0].store, "books");
        assert!(!schema.store("backup").unwrap().indexes.contains_key("byYear"));
    }

    #[test]
    fn dropping_a_store_added_in_the_same_version() {
        let mut schema = library();
        schema
            .version(2)
            .unwrap()
            .add_store("scratch", StoreOptions::new())
            .unwrap()
            .add_index("byX", "x", IndexOptions::new())
            .unwrap();
        schema.del_store("scratch").unwrap();
        schema
            .rename_store("books", "literature", StoreOptions::new())
            .unwrap();
        schema.del_store("literature").unwrap();

        let delta = schema.delta(2).unwrap();
        assert!(delta.added_stores().is_empty());
        assert!(delta.added_indexes().is_empty());
        assert_eq!(delta.dropped_stores(), ["books".to_string()]);
        assert!(schema.stores().is_empty());
    }

    #[test]
    fn dropping_an_index_added_in_the_same_version() {
        let mut schema = library();
        schema
            .version(2)
            .unwrap()
            .get_store("books")
            .unwrap()
            .add_index("byYear", "year", IndexOptions::new())
            .unwrap()
            .del_index("byYear")
            .unwrap();
        let delta = schema.delta(2).unwrap();
        assert!(delta.added_indexes().is_empty());
        assert!(delta.dropped_indexes().is_empty());
    }

    #[test]
    fn untracked_copy_source_defers_to_the_host() {
        let mut schema = Model::new();
        schema
            .copy_store("legacy", "current", StoreOptions::new(), true)
            .unwrap();
        let copy = schema.store("current").unwrap().copy_from.clone().unwrap();
        assert!(!copy.source_known);
        assert!(schema.store("current").unwrap().indexes.is_empty());
    }

    #[test]
    fn dropping_untracked_store_is_recorded() {
        let mut schema = Model::new();
        schema.del_store("legacy").unwrap();
        assert_eq!(schema.delta(1).unwrap().dropped_stores(), ["legacy".to_string()]);
    }

    #[test]
    fn reflect_store_picks_up_host_definition() {
        let mut schema = Model::new();
        let info = StoreInfo {
            name: "external".into(),
            key_path: Some("id".into()),
            auto_increment: true,
            indexes: vec![vstore_host::IndexInfo {
                name: "byTag".into(),
                key_path: "tags".into(),
                unique: false,
                multi_entry: true,
            }],
        };
        schema
            .reflect_store(&info)
            .unwrap()
            .add_index("byName", "name", IndexOptions::new())
            .unwrap();
        let def = schema.store("external").unwrap();
        assert!(def.auto_increment);
        assert!(def.indexes["byTag"].multi_entry);
        assert_eq!(def.indexes.len(), 2);
    }

    #[test]
    fn delta_lookup() {
        let mut schema = Model::new();
        schema.version(3).unwrap();
        schema.version(7).unwrap();
        assert_eq!(schema.next_delta_after(0).unwrap().version(), 1);
        assert_eq!(schema.next_delta_after(1).unwrap().version(), 3);
        assert_eq!(schema.next_delta_after(5).unwrap().version(), 7);
        assert!(schema.next_delta_after(7).is_none());
        assert_eq!(schema.delta_at_or_before(6).unwrap().version(), 3);
        assert_eq!(schema.latest_version(), 7);
    }

    #[test]
    fn clone_diverges_independently() {
        let base = library();
        let mut derived = base.clone();
        derived
            .version(2)
            .unwrap()
            .add_store("magazines", StoreOptions::new())
            .unwrap();
        assert_eq!(base.stores().len(), 1);
        assert_eq!(derived.stores().len(), 2);
        assert_eq!(base.latest_version(), 1);
        assert_eq!(derived.latest_version(), 2);
    }

    #[test]
    fn callbacks_attach_to_current_version() {
        let mut schema = Model::new();
        schema.add_callback(|_| Ok(()));
        schema.version(2).unwrap();
        schema.add_callback(|_| Ok(())).add_callback(|_| Ok(()));
        schema.add_early_callback(|_| Ok(()));
        assert_eq!(schema.delta(1).unwrap().callbacks().len(), 1);
        assert_eq!(schema.delta(2).unwrap().callbacks().len(), 2);
        assert_eq!(schema.delta(2).unwrap().early_callbacks().len(), 1);
    }
}
