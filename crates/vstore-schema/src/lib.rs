//! # vstore-schema
//!
//! Describe a database schema as an ordered list of version deltas.
//!
//! Each delta records the stores and indexes one version adds or drops,
//! plus callbacks to run once that version's structural changes commit.
//! The model also keeps a live view of the stores the deltas add up to, so
//! later versions can be validated against it while they are declared.
//!
//! ## Quick Start
//!
//! ```
//! use vstore_schema::{IndexOptions, SchemaModel, StoreOptions};
//!
//! # fn main() -> Result<(), vstore_schema::SchemaError> {
//! let mut schema: SchemaModel<()> = SchemaModel::new();
//! schema
//!     .add_store("books", StoreOptions::keyed("isbn"))?
//!     .add_index("byTitle", "title", IndexOptions::new().unique(true))?;
//! schema.add_callback(|_conn| Ok(()));
//!
//! schema.version(2)?;
//! schema.add_store("magazines", StoreOptions::new().auto_increment(true))?;
//!
//! assert_eq!(schema.latest_version(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! With the `schema-file` feature, a model can also be loaded from TOML
//! (see [`SchemaFile`]).

mod callback;
mod early;
mod error;
mod model;
#[cfg(feature = "schema-file")]
mod schema_file;

pub use callback::{BoxError, Callback, CallbackOutcome, EarlyCallback};
pub use early::{EarlyContext, IndexChanges, LiveStore};
pub use error::SchemaError;
pub use model::{
    CopyFrom, IndexDef, IndexOptions, IndexSnapshot, SchemaModel, StoreDef, StoreHandle,
    StoreOptions, StoreSnapshot, VersionDelta,
};
#[cfg(feature = "schema-file")]
pub use schema_file::{SchemaFile, SchemaOp, VersionSpec};
