//! # vstore-checkpoint
//!
//! Durable records of upgrades that stopped part-way.
//!
//! When an upgrade callback fails, the driver stores a [`Checkpoint`] under
//! the database name. Until it is cleared, later upgrades of that database
//! refuse to start and offer a resume instead.
//!
//! ## Quick Start
//!
//! ```
//! use vstore_checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpoints};
//!
//! let store = MemoryCheckpoints::new();
//! store.set("library", &Checkpoint::new(3, "bad callback", 1)).unwrap();
//! assert_eq!(store.get("library").unwrap().unwrap().callback_index, 1);
//! store.clear("library").unwrap();
//! ```
//!
//! ## Backends
//!
//! | Backend | Feature flag | Durability |
//! |---------|-------------|------------|
//! | [`MemoryCheckpoints`] | *(always available)* | volatile |
//! | [`JsonFileCheckpoints`] | *(always available)* | durable |
//! | `SqliteCheckpoints` | `sqlite` | durable (volatile in memory) |
//! | `RedbCheckpoints` | `redb` | durable (volatile in memory) |

mod json;
mod memory;
#[cfg(feature = "redb")]
mod redb;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use json::JsonFileCheckpoints;
pub use memory::MemoryCheckpoints;
#[cfg(feature = "redb")]
pub use redb::RedbCheckpoints;
#[cfg(feature = "sqlite")]
pub use sqlite::{JournalMode, SqliteCheckpoints, SqliteConfig};
pub use traits::*;
