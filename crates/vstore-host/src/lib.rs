//! # vstore-host
//!
//! The storage-engine contract the rest of vstore is written against.
//!
//! A host engine stores named databases, each with an integer version and a
//! set of object stores (keyed record collections with secondary indexes).
//! Structural changes are only legal inside the version-change transaction
//! an engine runs when a database is opened at a higher version.
//!
//! ## Pieces
//!
//! | Item | Role |
//! |------|------|
//! | [`Key`], [`KeyPath`] | Totally ordered record keys and where they live in a record |
//! | [`StorageEngine`] | Opens and deletes databases through event-firing [`Request`]s |
//! | [`Connection`] | An open database: metadata plus data transactions |
//! | [`VersionChange`] | The structural transaction handed to upgrade handlers |
//! | [`MemoryEngine`] | A complete in-memory engine for tests and tooling |

mod error;
mod key;
mod memory;
mod request;
mod traits;

pub use error::{HostError, HostErrorKind};
pub use key::{Key, KeyPath};
pub use memory::{MemoryConnection, MemoryEngine};
pub use request::{Deletion, Request, RequestEvent, Responder};
pub use traits::*;
