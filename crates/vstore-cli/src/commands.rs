use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use tracing::info;
use vstore_checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpoints};
use vstore_host::{Connection, MemoryConnection, MemoryEngine, StoreInfo};
use vstore_migrate::{ConnectionFactory, DriverConfig, UpgradeDriver};
use vstore_schema::{SchemaFile, SchemaModel, StoreSnapshot};

type Result<T = ()> = std::result::Result<T, Box<dyn std::error::Error>>;

type Model = SchemaModel<MemoryConnection>;

/// One line of a store table.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StoreRow {
    name: String,
    key_path: String,
    auto_increment: bool,
    indexes: Vec<String>,
}

fn index_label(name: &str, unique: bool, multi_entry: bool) -> String {
    match (unique, multi_entry) {
        (false, false) => name.to_string(),
        (true, false) => format!("{name} (unique)"),
        (false, true) => format!("{name} (multi)"),
        (true, true) => format!("{name} (unique, multi)"),
    }
}

impl From<&StoreSnapshot> for StoreRow {
    fn from(store: &StoreSnapshot) -> Self {
        Self {
            name: store.name.clone(),
            key_path: store
                .key_path
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string),
            auto_increment: store.auto_increment,
            indexes: store
                .indexes
                .iter()
                .map(|i| index_label(&i.name, i.unique, i.multi_entry))
                .collect(),
        }
    }
}

impl From<&StoreInfo> for StoreRow {
    fn from(store: &StoreInfo) -> Self {
        Self {
            name: store.name.clone(),
            key_path: store
                .key_path
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string),
            auto_increment: store.auto_increment,
            indexes: store
                .indexes
                .iter()
                .map(|i| index_label(&i.name, i.unique, i.multi_entry))
                .collect(),
        }
    }
}

fn render_stores(out: &mut String, rows: &[StoreRow]) {
    if rows.is_empty() {
        out.push_str("  (no stores)\n");
        return;
    }
    let _ = writeln!(out, "  {:<20} {:<16} {:<5} Indexes", "Store", "Key path", "Auto");
    let _ = writeln!(out, "  {}", "-".repeat(60));
    for row in rows {
        let indexes = if row.indexes.is_empty() {
            "-".to_string()
        } else {
            row.indexes.join(", ")
        };
        let _ = writeln!(
            out,
            "  {:<20} {:<16} {:<5} {}",
            row.name,
            row.key_path,
            if row.auto_increment { "yes" } else { "no" },
            indexes
        );
    }
}

fn render_check(path: &str, database: Option<&str>, model: &Model) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Schema: {path}");
    let _ = writeln!(out, "Database: {}", database.unwrap_or("(unnamed)"));
    let _ = writeln!(out, "Latest version: {}", model.latest_version());
    out.push('\n');

    let _ = writeln!(
        out,
        "  {:<8} {:>8} {:>8} {:>9} {:>9}",
        "Version", "+stores", "-stores", "+indexes", "-indexes"
    );
    let _ = writeln!(out, "  {}", "-".repeat(46));
    for delta in model.deltas() {
        let _ = writeln!(
            out,
            "  {:<8} {:>8} {:>8} {:>9} {:>9}",
            delta.version(),
            delta.added_stores().len(),
            delta.dropped_stores().len(),
            delta.added_indexes().len(),
            delta.dropped_indexes().len(),
        );
    }
    out.push('\n');

    let rows: Vec<StoreRow> = model.stores().iter().map(StoreRow::from).collect();
    render_stores(&mut out, &rows);
    out
}

/// `vstore schema check <file>`: validate a schema file and show what it
/// builds.
pub fn schema_check(path: &Path, json: bool) -> Result {
    let file = SchemaFile::load(path)?;
    let model: Model = file.build()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&model.stores())?);
    } else {
        print!(
            "{}",
            render_check(&path.display().to_string(), file.database.as_deref(), &model)
        );
    }
    Ok(())
}

/// Drive a fresh in-memory database through every defined version up to
/// `target`, recording the layout after each one.
async fn plan(model: Model, database: &str, target: u32) -> Result<Vec<(u32, Vec<StoreRow>)>> {
    if target == 0 {
        return Err("the target version must be at least 1".into());
    }
    let steps: Vec<u32> = model
        .deltas()
        .map(|delta| delta.version())
        .filter(|version| *version <= target)
        .collect();

    let driver = UpgradeDriver::with_config(
        model,
        ConnectionFactory::new(Arc::new(MemoryEngine::new())),
        Arc::new(MemoryCheckpoints::new()),
        DriverConfig::default().require_durable_checkpoints(false),
    )?;

    let mut layouts = Vec::with_capacity(steps.len());
    for version in steps {
        let conn = driver.open(database, Some(version)).await?;
        let rows: Vec<StoreRow> = conn
            .store_names()
            .iter()
            .filter_map(|name| conn.store_info(name))
            .map(|info| StoreRow::from(&info))
            .collect();
        conn.close();
        layouts.push((version, rows));
    }
    Ok(layouts)
}

/// `vstore schema plan <file>`: show the layout after each upgrade step.
pub async fn schema_plan(path: &Path, target: Option<u32>) -> Result {
    let file = SchemaFile::load(path)?;
    let model: Model = file.build()?;
    let latest = model.latest_version();
    let target = target.unwrap_or(latest);
    let database = file.database.as_deref().unwrap_or("plan");

    info!(database, target, "planning upgrade");
    let layouts = plan(model, database, target).await?;

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Plan for {database}: {} step(s) to version {}",
        layouts.len(),
        target.min(latest)
    );
    if target > latest {
        let _ = writeln!(out, "(no version above {latest} is defined)");
    }
    for (version, rows) in &layouts {
        out.push('\n');
        let _ = writeln!(out, "Version {version}:");
        render_stores(&mut out, rows);
    }
    print!("{out}");
    Ok(())
}

fn render_checkpoints(entries: &[(String, Checkpoint)]) -> String {
    let mut out = String::new();
    if entries.is_empty() {
        out.push_str("No incomplete upgrades.\n");
        return out;
    }
    let _ = writeln!(out, "  {:<20} {:>8} {:>9}  Error", "Database", "Version", "Callback");
    let _ = writeln!(out, "  {}", "-".repeat(60));
    for (database, checkpoint) in entries {
        let _ = writeln!(
            out,
            "  {:<20} {:>8} {:>9}  {}",
            database, checkpoint.version, checkpoint.callback_index, checkpoint.error
        );
    }
    out
}

/// `vstore checkpoints list`
pub fn checkpoints_list(store: &dyn CheckpointStore) -> Result {
    print!("{}", render_checkpoints(&store.list()?));
    Ok(())
}

/// `vstore checkpoints show <db>`
pub fn checkpoints_show(store: &dyn CheckpointStore, database: &str) -> Result {
    match store.get(database)? {
        Some(checkpoint) => println!("{}", serde_json::to_string_pretty(&checkpoint)?),
        None => println!("No incomplete upgrade for \"{database}\"."),
    }
    Ok(())
}

/// `vstore checkpoints flush <db>`: forget an incomplete upgrade. Its
/// remaining callbacks will not run.
pub fn checkpoints_flush(store: &dyn CheckpointStore, database: &str) -> Result {
    if store.get(database)?.is_none() {
        println!("No incomplete upgrade for \"{database}\".");
        return Ok(());
    }
    store.clear(database)?;
    info!(database, "checkpoint flushed");
    println!("Flushed the incomplete upgrade of \"{database}\".");
    Ok(())
}
