//! Property: replaying a model onto a fresh database yields the layout the
//! model describes.

use std::sync::Arc;

use proptest::prelude::*;
use vstore_checkpoint::MemoryCheckpoints;
use vstore_host::{Connection, MemoryConnection, MemoryEngine};
use vstore_migrate::{ConnectionFactory, DriverConfig, UpgradeDriver};
use vstore_schema::{IndexOptions, SchemaModel, StoreOptions};

const STORES: [&str; 4] = ["alpha", "beta", "gamma", "delta"];
const INDEXES: [&str; 3] = ["byA", "byB", "byC"];

#[derive(Debug, Clone)]
enum Op {
    Add(usize),
    Drop(usize),
    Rename(usize, usize),
    AddIndex(usize, usize, bool),
    DropIndex(usize, usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..STORES.len()).prop_map(Op::Add),
        (0..STORES.len()).prop_map(Op::Drop),
        (0..STORES.len(), 0..STORES.len()).prop_map(|(a, b)| Op::Rename(a, b)),
        (0..STORES.len(), 0..INDEXES.len(), any::<bool>())
            .prop_map(|(s, i, unique)| Op::AddIndex(s, i, unique)),
        (0..STORES.len(), 0..INDEXES.len()).prop_map(|(s, i)| Op::DropIndex(s, i)),
    ]
}

/// Build a model from `plan`, one version per entry, skipping operations
/// the builder rejects. Operations on one store may pile up within a
/// version; the model folds them.
fn build(plan: &[Vec<Op>]) -> SchemaModel<MemoryConnection> {
    let mut schema = SchemaModel::new();
    for (step, ops) in plan.iter().enumerate() {
        schema.version(step as u32 + 1).unwrap();
        for op in ops {
            match *op {
                Op::Add(s) => {
                    let name = STORES[s];
                    if schema.store(name).is_none() {
                        let _ = schema.add_store(name, StoreOptions::keyed("id"));
                    }
                }
                Op::Drop(s) => {
                    let name = STORES[s];
                    if schema.store(name).is_some() {
                        let _ = schema.del_store(name);
                    }
                }
                Op::Rename(from, to) => {
                    let (from, to) = (STORES[from], STORES[to]);
                    if schema.store(from).is_some() && schema.store(to).is_none() {
                        let _ = schema.rename_store(from, to, StoreOptions::new());
                    }
                }
                Op::AddIndex(s, i, unique) => {
                    let name = STORES[s];
                    if let Ok(store) = schema.get_store(name) {
                        let _ = store.add_index(
                            INDEXES[i],
                            format!("f{i}"),
                            IndexOptions::new().unique(unique),
                        );
                    }
                }
                Op::DropIndex(s, i) => {
                    let name = STORES[s];
                    if let Ok(store) = schema.get_store(name) {
                        let _ = store.del_index(INDEXES[i]);
                    }
                }
            }
        }
    }
    schema
}

fn host_layout(conn: &MemoryConnection) -> Vec<(String, Vec<String>)> {
    conn.store_names()
        .into_iter()
        .map(|name| {
            let indexes = conn
                .store_info(&name)
                .map(|info| info.index_names())
                .unwrap_or_default();
            (name, indexes)
        })
        .collect()
}

fn model_layout(schema: &SchemaModel<MemoryConnection>) -> Vec<(String, Vec<String>)> {
    schema
        .stores()
        .into_iter()
        .map(|store| {
            let indexes = store.indexes.into_iter().map(|index| index.name).collect();
            (store.name, indexes)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn replay_matches_the_model(plan in prop::collection::vec(prop::collection::vec(op(), 0..5), 1..6)) {
        let schema = build(&plan);
        let expected = model_layout(&schema);
        let latest = schema.latest_version();

        let driver = UpgradeDriver::with_config(
            schema,
            ConnectionFactory::new(Arc::new(MemoryEngine::new())),
            Arc::new(MemoryCheckpoints::new()),
            DriverConfig::default().require_durable_checkpoints(false),
        )
        .unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (layout, version, replayed) = runtime.block_on(async {
            let conn = driver.open("db", None).await.unwrap();
            let layout = host_layout(&conn);
            let version = conn.version();
            conn.close();

            // A second pass over an up-to-date database changes nothing.
            let conn = driver.open("db", None).await.unwrap();
            let replayed = host_layout(&conn);
            conn.close();
            (layout, version, replayed)
        });

        prop_assert_eq!(version, latest);
        prop_assert_eq!(&layout, &expected);
        prop_assert_eq!(replayed, layout);
    }
}
