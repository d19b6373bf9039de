//! TOML schema files.
//!
//! ```toml
//! database = "library"
//!
//! [[version]]
//! version = 1
//!
//! [[version.op]]
//! op = "add_store"
//! name = "books"
//! key_path = "isbn"
//!
//! [[version.op]]
//! op = "add_index"
//! store = "books"
//! name = "byTitle"
//! field = "title"
//! unique = true
//!
//! [[version]]
//! version = 2
//!
//! [[version.op]]
//! op = "rename_store"
//! from = "books"
//! to = "literature"
//! ```
//!
//! Ops replay through the builder in file order, so a file is valid exactly
//! when the same calls made in code would be.

use std::path::Path;

use serde::Deserialize;
use vstore_host::KeyPath;

use crate::error::SchemaError;
use crate::model::{IndexOptions, SchemaModel, StoreOptions};

/// Top-level structure of a schema file.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaFile {
    /// Default database name for tooling.
    pub database: Option<String>,
    #[serde(rename = "version", default)]
    pub versions: Vec<VersionSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionSpec {
    pub version: u64,
    #[serde(rename = "op", default)]
    pub ops: Vec<SchemaOp>,
}

/// One builder call.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaOp {
    AddStore {
        name: String,
        key_path: Option<KeyPath>,
        auto_increment: Option<bool>,
    },
    DelStore {
        name: String,
    },
    RenameStore {
        from: String,
        to: String,
        key_path: Option<KeyPath>,
        auto_increment: Option<bool>,
    },
    CopyStore {
        from: String,
        to: String,
        key_path: Option<KeyPath>,
        auto_increment: Option<bool>,
        #[serde(default)]
        delete_source: bool,
    },
    AddIndex {
        store: String,
        name: String,
        field: KeyPath,
        #[serde(default)]
        unique: bool,
        #[serde(default)]
        multi_entry: bool,
    },
    DelIndex {
        store: String,
        name: String,
    },
}

fn store_options(key_path: &Option<KeyPath>, auto_increment: Option<bool>) -> StoreOptions {
    StoreOptions {
        key_path: key_path.clone(),
        auto_increment,
    }
}

impl SchemaFile {
    pub fn parse(source: &str) -> Result<Self, SchemaError> {
        toml::from_str(source).map_err(|e| SchemaError::File(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| SchemaError::File(format!("{}: {e}", path.display())))?;
        Self::parse(&source)
    }

    /// Replay the file into a fresh model.
    pub fn build<C>(&self) -> Result<SchemaModel<C>, SchemaError> {
        let mut model = SchemaModel::new();
        for spec in &self.versions {
            let version =
                u32::try_from(spec.version).map_err(|_| SchemaError::InvalidVersion(spec.version))?;
            model.version(version)?;
            for op in &spec.ops {
                apply(&mut model, op)?;
            }
        }
        Ok(model)
    }
}

fn apply<C>(model: &mut SchemaModel<C>, op: &SchemaOp) -> Result<(), SchemaError> {
    match op {
        SchemaOp::AddStore {
            name,
            key_path,
            auto_increment,
        } => {
            model.add_store(name, store_options(key_path, *auto_increment))?;
        }
        SchemaOp::DelStore { name } => {
            model.del_store(name)?;
        }
        SchemaOp::RenameStore {
            from,
            to,
            key_path,
            auto_increment,
        } => {
            model.rename_store(from, to, store_options(key_path, *auto_increment))?;
        }
        SchemaOp::CopyStore {
            from,
            to,
            key_path,
            auto_increment,
            delete_source,
        } => {
            model.copy_store(
                from,
                to,
                store_options(key_path, *auto_increment),
                *delete_source,
            )?;
        }
        SchemaOp::AddIndex {
            store,
            name,
            field,
            unique,
            multi_entry,
        } => {
            let options = IndexOptions::new().unique(*unique).multi_entry(*multi_entry);
            model.get_store(store)?.add_index(name, field.clone(), options)?;
        }
        SchemaOp::DelIndex { store, name } => {
            model.get_store(store)?.del_index(name)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIBRARY: &str = r#"
database = "library"

[[version]]
version = 1

[[version.op]]
op = "add_store"
name = "books"
key_path = "isbn"

[[version.op]]
op = "add_index"
store = "books"
name = "byTitle"
field = "title"
unique = true

[[version]]
version = 2

[[version.op]]
op = "rename_store"
from = "books"
to = "literature"
"#;

    #[test]
    fn parses_and_builds() {
        let file = SchemaFile::parse(LIBRARY).unwrap();
        assert_eq!(file.database.as_deref(), Some("library"));
        assert_eq!(file.versions.len(), 2);

        let model: SchemaModel<()> = file.build().unwrap();
        assert_eq!(model.latest_version(), 2);
        let stores = model.stores();
        assert_eq!(stores[0].name, "literature");
        assert_eq!(stores[0].indexes[0].name, "byTitle");
        assert!(stores[0].indexes[0].unique);
    }

    #[test]
    fn builder_validation_applies() {
        let source = r#"
[[version]]
version = 1

[[version.op]]
op = "add_index"
store = "missing"
name = "byX"
field = "x"
"#;
        let file = SchemaFile::parse(source).unwrap();
        assert_eq!(
            file.build::<()>().unwrap_err(),
            SchemaError::StoreNotDefined("missing".into())
        );
    }

    #[test]
    fn oversized_version_is_rejected() {
        let source = "[[version]]\nversion = 4294967296\n";
        let file = SchemaFile::parse(source).unwrap();
        assert_eq!(
            file.build::<()>().unwrap_err(),
            SchemaError::InvalidVersion(4_294_967_296)
        );
    }

    #[test]
    fn unknown_op_is_a_file_error() {
        let source = "[[version]]\nversion = 1\n[[version.op]]\nop = \"truncate\"\n";
        assert!(matches!(
            SchemaFile::parse(source),
            Err(SchemaError::File(_))
        ));
    }

    #[test]
    fn compound_fields_parse() {
        let source = r#"
[[version]]
version = 1

[[version.op]]
op = "add_store"
name = "people"
key_path = ["last", "first"]
"#;
        let model: SchemaModel<()> = SchemaFile::parse(source).unwrap().build().unwrap();
        assert_eq!(
            model.store("people").unwrap().key_path,
            Some(KeyPath::from(["last", "first"]))
        );
    }
}
