//! # vstore-migrate
//!
//! Drives a versioned object-store database from whatever version it is at
//! to the version a [`SchemaModel`](vstore_schema::SchemaModel) describes.
//!
//! - [`ConnectionFactory`] turns the host engine's event-style requests into
//!   futures and surfaces blocked requests with a continuation.
//! - [`UpgradeDriver`] applies one delta per version change, runs callbacks
//!   in order once each change commits, and checkpoints failed callbacks so
//!   a later retry skips the ones that already ran.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vstore_migrate::{ConnectionFactory, DriverConfig, UpgradeDriver};
//! use vstore_migrate::vstore_checkpoint::MemoryCheckpoints;
//! use vstore_migrate::vstore_host::{Connection, MemoryConnection, MemoryEngine};
//! use vstore_migrate::vstore_schema::{IndexOptions, SchemaModel, StoreOptions};
//!
//! # tokio_test();
//! # fn tokio_test() {
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! # rt.block_on(async {
//! let mut schema = SchemaModel::<MemoryConnection>::new();
//! schema
//!     .add_store("books", StoreOptions::keyed("isbn"))?
//!     .add_index("byTitle", "title", IndexOptions::new().unique(true))?;
//! schema.version(2)?.rename_store("books", "literature", StoreOptions::new())?;
//!
//! let driver = UpgradeDriver::with_config(
//!     schema,
//!     ConnectionFactory::new(Arc::new(MemoryEngine::new())),
//!     Arc::new(MemoryCheckpoints::new()),
//!     DriverConfig::default().require_durable_checkpoints(false),
//! )?;
//! let conn = driver.open("library", None).await?;
//! assert_eq!(conn.store_names(), vec!["literature"]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! # }
//! ```

mod apply;
mod config;
mod driver;
mod error;
mod factory;
mod state;

pub use config::{DriverConfig, FactoryConfig};
pub use driver::UpgradeDriver;
pub use error::{ErrorKind, Retry, StructuralCause, UpgradeError};
pub use factory::{Blocked, ConnectionFactory, RequestError, Resume};
pub use state::UpgradeState;

pub use vstore_checkpoint;
pub use vstore_host;
pub use vstore_schema;
