use std::fmt;

use futures::future::BoxFuture;
use thiserror::Error;
use vstore_checkpoint::CheckpointError;
use vstore_host::HostError;
use vstore_schema::{BoxError, SchemaError};

/// One-shot continuation of a failed upgrade.
///
/// Resolves to the connection when the failed call was
/// [`UpgradeDriver::open`](crate::UpgradeDriver::open), and to `None` when it
/// was [`UpgradeDriver::upgrade`](crate::UpgradeDriver::upgrade).
pub type Retry<C> =
    Box<dyn FnOnce() -> BoxFuture<'static, Result<Option<C>, UpgradeError<C>>> + Send + Sync>;

/// Coarse classification of an [`UpgradeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Blocked,
    Structural,
    Callback,
    Version,
    Host,
    Checkpoint,
    MissingCapability,
}

/// Why a delta's structural changes were rolled back.
#[derive(Debug, Error)]
pub enum StructuralCause {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error("early callback failed: {0}")]
    EarlyCallback(BoxError),

    #[error("copy into \"{store}\" stored {copied} of {expected} records")]
    IncompleteCopy {
        store: String,
        expected: u64,
        copied: u64,
    },
}

/// Errors returned by the upgrade driver.
///
/// Nothing is retried automatically. Retryable errors carry a continuation
/// ([`retry`](Self::retry)); blocked ones carry one that waits for the
/// blocking connections to close ([`resume`](Self::resume)).
#[derive(Error)]
pub enum UpgradeError<C> {
    #[error("invalid upgrade request: {0}")]
    Validation(String),

    #[error("upgrade of \"{database}\" from version {old_version} is blocked by other open connections")]
    Blocked {
        database: String,
        old_version: u32,
        new_version: Option<u32>,
        resume: Retry<C>,
    },

    #[error("structural changes for version {version} failed: {cause}")]
    Structural {
        version: u32,
        #[source]
        cause: StructuralCause,
        retry: Retry<C>,
    },

    #[error("callback {callback_index} of version {version} failed: {source}")]
    Callback {
        version: u32,
        callback_index: usize,
        source: BoxError,
        retry: Retry<C>,
    },

    #[error("an upgrade previously failed to complete for version {version} due to reason: {error}")]
    Incomplete {
        database: String,
        version: u32,
        callback_index: usize,
        error: String,
        retry: Retry<C>,
    },

    #[error("the requested version ({requested}) is less than the existing version ({existing})")]
    Version { requested: u32, existing: u32 },

    #[error("host error: {0}")]
    Host(#[from] HostError),

    #[error("checkpoint store: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("missing capability: {0}")]
    MissingCapability(String),
}

impl<C> From<SchemaError> for UpgradeError<C> {
    fn from(e: SchemaError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl<C> UpgradeError<C> {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Blocked { .. } => ErrorKind::Blocked,
            Self::Structural { .. } => ErrorKind::Structural,
            Self::Callback { .. } | Self::Incomplete { .. } => ErrorKind::Callback,
            Self::Version { .. } => ErrorKind::Version,
            Self::Host(_) => ErrorKind::Host,
            Self::Checkpoint(_) => ErrorKind::Checkpoint,
            Self::MissingCapability(_) => ErrorKind::MissingCapability,
        }
    }

    /// Whether [`retry`](Self::retry) can make progress.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Structural { .. } | Self::Callback { .. } | Self::Incomplete { .. }
        )
    }

    /// Take the retry continuation, or get the error back if there is none.
    pub fn into_retry(self) -> Result<Retry<C>, Self> {
        match self {
            Self::Structural { retry, .. }
            | Self::Callback { retry, .. }
            | Self::Incomplete { retry, .. } => Ok(retry),
            other => Err(other),
        }
    }

    /// Take the continuation of a blocked upgrade.
    pub fn into_resume(self) -> Result<Retry<C>, Self> {
        match self {
            Self::Blocked { resume, .. } => Ok(resume),
            other => Err(other),
        }
    }

    /// Run the retry continuation. Non-retryable errors come straight back.
    pub async fn retry(self) -> Result<Option<C>, Self> {
        let retry = self.into_retry()?;
        retry().await
    }

    /// Wait for the blocking connections to close, then carry on with the
    /// upgrade. Errors other than `Blocked` come straight back.
    pub async fn resume(self) -> Result<Option<C>, Self> {
        let resume = self.into_resume()?;
        resume().await
    }
}

impl<C> fmt::Debug for UpgradeError<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => f.debug_tuple("Validation").field(msg).finish(),
            Self::Blocked {
                database,
                old_version,
                new_version,
                ..
            } => f
                .debug_struct("Blocked")
                .field("database", database)
                .field("old_version", old_version)
                .field("new_version", new_version)
                .finish_non_exhaustive(),
            Self::Structural { version, cause, .. } => f
                .debug_struct("Structural")
                .field("version", version)
                .field("cause", cause)
                .finish_non_exhaustive(),
            Self::Callback {
                version,
                callback_index,
                source,
                ..
            } => f
                .debug_struct("Callback")
                .field("version", version)
                .field("callback_index", callback_index)
                .field("source", source)
                .finish_non_exhaustive(),
            Self::Incomplete {
                database,
                version,
                callback_index,
                error,
                ..
            } => f
                .debug_struct("Incomplete")
                .field("database", database)
                .field("version", version)
                .field("callback_index", callback_index)
                .field("error", error)
                .finish_non_exhaustive(),
            Self::Version {
                requested,
                existing,
            } => f
                .debug_struct("Version")
                .field("requested", requested)
                .field("existing", existing)
                .finish(),
            Self::Host(e) => f.debug_tuple("Host").field(e).finish(),
            Self::Checkpoint(e) => f.debug_tuple("Checkpoint").field(e).finish(),
            Self::MissingCapability(msg) => {
                f.debug_tuple("MissingCapability").field(msg).finish()
            }
        }
    }
}
