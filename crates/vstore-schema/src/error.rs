use thiserror::Error;

/// Invalid input to the schema builder.
///
/// Raised synchronously while the model is being built; never retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("invalid version {0}: versions run from 1 to 4294967295")]
    InvalidVersion(u64),

    #[error("version {requested} is lower than the last entered version {last}")]
    VersionNotIncreasing { requested: u32, last: u32 },

    #[error("a store name is required")]
    MissingStoreName,

    #[error("\"{0}\" store is already defined")]
    StoreExists(String),

    #[error("\"{0}\" store is not defined")]
    StoreNotDefined(String),

    #[error("a copy source name is required")]
    MissingCopySource,

    #[error("copy source \"{0}\" is slated for deletion in this version")]
    CopySourceDeleted(String),

    #[error("copy source \"{0}\" is added in this same version")]
    CopySourceAdded(String),

    /// The store feeds a copy in this version; deleting it would lose the
    /// content before it moves.
    #[error("\"{store}\" is copied to \"{target}\"; set delete_source on the copy to drop it")]
    StoreIsCopySource { store: String, target: String },

    #[error("\"{store}\" is already slated for deletion by its move to \"{target}\"")]
    StoreIsMovedSource { store: String, target: String },

    /// An early callback reached for a store its version drops or moves.
    #[error("\"{0}\" store is dropped or moved away by this version")]
    StoreVacated(String),

    #[error("store \"{0}\": keyPath must not be the empty string or a sequence if autoIncrement is in use")]
    InvalidAutoIncrement(String),

    #[error("an index name is required")]
    MissingIndexName,

    #[error("index \"{0}\" needs a field")]
    MissingIndexField(String),

    #[error("\"{index}\" index is already defined on \"{store}\"")]
    IndexExists { store: String, index: String },

    #[error("\"{index}\" index is not defined on \"{store}\"")]
    IndexNotDefined { store: String, index: String },

    #[error("schema file: {0}")]
    File(String),
}
