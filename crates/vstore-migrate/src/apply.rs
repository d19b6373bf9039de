//! Structural changes of one delta, inside a version-change transaction.

use vstore_host::{HostError, IndexParams, StoreParams, VersionChange};
use vstore_schema::{CopyFrom, EarlyContext, IndexChanges, IndexDef, StoreDef, VersionDelta};

use crate::error::StructuralCause;

/// Apply `delta` to `tx`.
///
/// Order: early callbacks, store drops, store additions (copies carry their
/// content over before the next addition starts), index drops, index
/// additions, then the index changes early callbacks queued. Indexes come
/// last because they are built over content that copies have just moved.
pub(crate) fn apply_delta<C>(
    delta: &VersionDelta<C>,
    tx: &mut dyn VersionChange,
) -> Result<(), StructuralCause> {
    let vacated = delta.vacated_stores();
    let mut queued = IndexChanges::default();
    for early in delta.early_callbacks() {
        let mut cx = EarlyContext::new(&mut *tx, &vacated, &mut queued);
        early.invoke(&mut cx).map_err(StructuralCause::EarlyCallback)?;
    }

    for name in delta.dropped_stores() {
        tx.delete_object_store(name)?;
    }

    for store in delta.added_stores() {
        match &store.copy_from {
            Some(copy) => copy_store(tx, store, copy)?,
            None => tx.create_object_store(
                &store.name,
                &StoreParams {
                    key_path: store.key_path.clone(),
                    auto_increment: store.auto_increment,
                },
            )?,
        }
    }

    for index in delta.dropped_indexes().iter().chain(queued.dropped()) {
        tx.delete_index(&index.store, &index.name)?;
    }

    for index in delta.added_indexes().iter().chain(queued.added()) {
        create_index(tx, &index.store, index)?;
    }

    Ok(())
}

fn create_index(tx: &mut dyn VersionChange, store: &str, index: &IndexDef) -> Result<(), HostError> {
    tx.create_index(
        store,
        &index.name,
        &index.field,
        IndexParams {
            unique: index.unique,
            multi_entry: index.multi_entry,
        },
    )
}

fn copy_store(
    tx: &mut dyn VersionChange,
    target: &StoreDef,
    copy: &CopyFrom,
) -> Result<(), StructuralCause> {
    let source = tx.store_info(&copy.source).ok_or_else(|| {
        HostError::not_found(format!("copy source \"{}\" does not exist", copy.source))
    })?;

    // A source the model defined already resolved the target's settings
    // and indexes. For any other source the host's view is all there is.
    let (params, indexes): (StoreParams, Vec<IndexDef>) = if copy.source_known {
        let params = StoreParams {
            key_path: target.key_path.clone(),
            auto_increment: target.auto_increment,
        };
        (params, target.indexes.values().cloned().collect())
    } else {
        let params = StoreParams {
            key_path: copy
                .source_options
                .key_path
                .clone()
                .or_else(|| source.key_path.clone()),
            auto_increment: copy
                .source_options
                .auto_increment
                .unwrap_or(source.auto_increment),
        };
        let indexes = StoreDef::from_info(&source).indexes.into_values().collect();
        (params, indexes)
    };
    tx.create_object_store(&target.name, &params)?;

    let entries = tx.entries(&copy.source)?;
    let expected = entries.len() as u64;
    for (key, record) in entries {
        // In-line keys travel inside the record.
        let explicit = if params.key_path.is_some() { None } else { Some(key) };
        tx.add(&target.name, record, explicit)?;
    }
    let copied = tx.count(&target.name)?;
    if copied != expected {
        return Err(StructuralCause::IncompleteCopy {
            store: target.name.clone(),
            expected,
            copied,
        });
    }

    for index in &indexes {
        create_index(tx, &target.name, index)?;
    }

    if copy.delete_source {
        tx.delete_object_store(&copy.source)?;
    }
    Ok(())
}
