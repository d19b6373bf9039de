use std::fmt;

use vstore_host::{KeyPath, VersionChange};

use crate::error::SchemaError;
use crate::model::{record_index_drop, IndexDef, IndexOptions, StoreDef};

/// Index changes early callbacks queued for the version being applied.
///
/// They run after the version's own index changes: drops first, then
/// additions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexChanges {
    added: Vec<IndexDef>,
    dropped: Vec<IndexDef>,
}

impl IndexChanges {
    pub fn added(&self) -> &[IndexDef] {
        &self.added
    }

    pub fn dropped(&self) -> &[IndexDef] {
        &self.dropped
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.dropped.is_empty()
    }

    fn replay_onto(&self, def: &mut StoreDef) {
        for index in self.dropped.iter().filter(|i| i.store == def.name) {
            def.indexes.remove(&index.name);
        }
        for index in self.added.iter().filter(|i| i.store == def.name) {
            def.indexes.insert(index.name.clone(), index.clone());
        }
    }
}

/// What an early callback works with: the open version-change transaction,
/// and a way to pick up stores the schema model does not track.
///
/// # Example
///
/// ```
/// use vstore_schema::{IndexOptions, SchemaModel};
///
/// # fn main() -> Result<(), vstore_schema::SchemaError> {
/// let mut schema: SchemaModel<()> = SchemaModel::new();
/// schema.version(2)?;
/// schema.add_early_callback(|cx| {
///     // "legacy" was created by another tool.
///     if cx.tx().store_names().iter().any(|s| s == "legacy") {
///         cx.get_store("legacy")?
///             .add_index("byTag", "tag", IndexOptions::new())?;
///     }
///     Ok(())
/// });
/// # Ok(())
/// # }
/// ```
pub struct EarlyContext<'a> {
    tx: &'a mut dyn VersionChange,
    vacated: &'a [&'a str],
    queued: &'a mut IndexChanges,
}

impl<'a> EarlyContext<'a> {
    /// `vacated` names the stores the version drops or moves away; they
    /// cannot be selected.
    pub fn new(
        tx: &'a mut dyn VersionChange,
        vacated: &'a [&'a str],
        queued: &'a mut IndexChanges,
    ) -> Self {
        Self {
            tx,
            vacated,
            queued,
        }
    }

    /// The version-change transaction. Anything done through it happens
    /// right away, ahead of the version's structural changes.
    pub fn tx(&mut self) -> &mut dyn VersionChange {
        &mut *self.tx
    }

    /// Version being applied.
    pub fn version(&self) -> u32 {
        self.tx.new_version()
    }

    /// Select a store as the host has it, with the index changes earlier
    /// early callbacks of this version queued for it.
    pub fn get_store(&mut self, name: &str) -> Result<LiveStore<'_>, SchemaError> {
        if name.is_empty() {
            return Err(SchemaError::MissingStoreName);
        }
        if self.vacated.iter().any(|s| *s == name) {
            return Err(SchemaError::StoreVacated(name.to_string()));
        }
        let info = self
            .tx
            .store_info(name)
            .ok_or_else(|| SchemaError::StoreNotDefined(name.to_string()))?;
        let mut def = StoreDef::from_info(&info);
        self.queued.replay_onto(&mut def);
        Ok(LiveStore {
            def,
            queued: &mut *self.queued,
        })
    }
}

impl fmt::Debug for EarlyContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EarlyContext")
            .field("database", &self.tx.database())
            .field("version", &self.tx.new_version())
            .field("vacated", &self.vacated)
            .field("queued", &self.queued)
            .finish()
    }
}

/// A host store selected inside an early callback.
///
/// Index changes are checked against the store's current indexes and
/// queued for the version being applied. The schema model is left as it
/// is.
#[derive(Debug)]
pub struct LiveStore<'c> {
    def: StoreDef,
    queued: &'c mut IndexChanges,
}

impl LiveStore<'_> {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// The store as it will be once the queued changes ran.
    pub fn def(&self) -> &StoreDef {
        &self.def
    }

    pub fn add_index(
        mut self,
        name: &str,
        field: impl Into<KeyPath>,
        options: IndexOptions,
    ) -> Result<Self, SchemaError> {
        let index = self.def.define_index(name, field.into(), options)?;
        self.queued.added.push(index);
        Ok(self)
    }

    pub fn del_index(mut self, name: &str) -> Result<Self, SchemaError> {
        let index = self.def.remove_index(name)?;
        record_index_drop(&mut self.queued.added, &mut self.queued.dropped, index);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vstore_host::{
        Connection, IndexParams, MemoryEngine, RequestEvent, StorageEngine, StoreParams,
        UpgradeHandler,
    };

    fn open(engine: &MemoryEngine, version: u32, handler: UpgradeHandler) {
        let mut request = engine.open("db", Some(version), Some(handler));
        match futures::executor::block_on(request.next_event()) {
            Some(RequestEvent::Success(conn)) => conn.close(),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    /// A database at version 1 holding `legacy` with a `byTag` index, and
    /// `check` run inside the upgrade to version 2.
    fn in_upgrade(check: impl FnOnce(&mut dyn VersionChange) + Send + 'static) {
        let engine = MemoryEngine::new();
        open(
            &engine,
            1,
            Box::new(|tx: &mut dyn VersionChange| {
                tx.create_object_store(
                    "legacy",
                    &StoreParams {
                        key_path: Some("id".into()),
                        auto_increment: false,
                    },
                )?;
                tx.create_index("legacy", "byTag", &"tag".into(), IndexParams::default())
            }),
        );
        open(
            &engine,
            2,
            Box::new(move |tx: &mut dyn VersionChange| {
                check(tx);
                Ok(())
            }),
        );
    }

    #[test]
    fn selected_store_mirrors_host_and_queue() {
        in_upgrade(|tx| {
            let mut queued = IndexChanges::default();
            let mut cx = EarlyContext::new(tx, &[], &mut queued);
            assert_eq!(cx.version(), 2);

            cx.get_store("legacy")
                .unwrap()
                .add_index("byName", "name", IndexOptions::new().unique(true))
                .unwrap()
                .del_index("byTag")
                .unwrap();
            let again = cx.get_store("legacy").unwrap();
            let names: Vec<_> = again.def().indexes.keys().cloned().collect();
            assert_eq!(names, vec!["byName"]);
            assert_eq!(
                again.add_index("byName", "other", IndexOptions::new()).unwrap_err(),
                SchemaError::IndexExists {
                    store: "legacy".into(),
                    index: "byName".into()
                }
            );
            assert_eq!(
                cx.get_store("missing").unwrap_err(),
                SchemaError::StoreNotDefined("missing".into())
            );

            assert_eq!(queued.added()[0].name, "byName");
            assert!(queued.added()[0].unique);
            assert_eq!(queued.dropped()[0].name, "byTag");
        });
    }

    #[test]
    fn dropping_a_queued_index_cancels_it() {
        in_upgrade(|tx| {
            let mut queued = IndexChanges::default();
            let mut cx = EarlyContext::new(tx, &[], &mut queued);
            cx.get_store("legacy")
                .unwrap()
                .add_index("byName", "name", IndexOptions::new())
                .unwrap()
                .del_index("byName")
                .unwrap();
            assert!(queued.is_empty());
        });
    }

    #[test]
    fn vacated_stores_cannot_be_selected() {
        in_upgrade(|tx| {
            let mut queued = IndexChanges::default();
            let mut cx = EarlyContext::new(tx, &["legacy"], &mut queued);
            assert_eq!(
                cx.get_store("legacy").unwrap_err(),
                SchemaError::StoreVacated("legacy".into())
            );
            // Plain transaction access is unaffected.
            assert_eq!(cx.tx().store_names(), vec!["legacy"]);
        });
    }
}
