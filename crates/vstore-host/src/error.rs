use std::fmt;

use thiserror::Error;

/// Category of a host failure, mirroring the exception names storage
/// engines report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostErrorKind {
    /// A named store, index, or database does not exist.
    NotFound,
    /// A uniqueness or "already exists" constraint was violated.
    Constraint,
    /// Parameters are incompatible (e.g. auto-increment on a compound key path).
    InvalidAccess,
    /// The operation is not allowed in the object's current state.
    InvalidState,
    /// The requested version is lower than the stored one.
    Version,
    /// A record or key could not be used.
    Data,
    /// A write was attempted in a read-only transaction.
    ReadOnly,
    /// The transaction or request was aborted.
    Abort,
}

impl HostErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NotFoundError",
            Self::Constraint => "ConstraintError",
            Self::InvalidAccess => "InvalidAccessError",
            Self::InvalidState => "InvalidStateError",
            Self::Version => "VersionError",
            Self::Data => "DataError",
            Self::ReadOnly => "ReadOnlyError",
            Self::Abort => "AbortError",
        }
    }
}

impl fmt::Display for HostErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error reported by the host storage engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct HostError {
    pub kind: HostErrorKind,
    pub message: String,
}

impl HostError {
    pub fn new(kind: HostErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::NotFound, message)
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Constraint, message)
    }

    pub fn abort(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Abort, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Data, message)
    }
}
