// ABOUTME: Backend-independent error taxonomy for recorder operations.
// ABOUTME: Every storage driver error is translated into exactly one of these kinds.

use thiserror::Error;

/// Errors raised by recorders and admin transactions.
///
/// `Conflict` is reserved for a duplicate `(application, originator_id,
/// originator_version)`; it is the signal callers retry on. Any other
/// constraint violation is `Integrity`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("interface error: {0}")]
    Interface(String),

    #[error("data error: {0}")]
    Data(String),

    #[error("operational error: {0}")]
    Operational(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("programming error: {0}")]
    Programming(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("persistence error: {0}")]
    Other(String),
}

/// The kind of a [`PersistenceError`], without its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Conflict,
    Interface,
    Data,
    Operational,
    Integrity,
    Internal,
    Programming,
    NotSupported,
    Database,
    Other,
}

impl PersistenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Interface(_) => ErrorKind::Interface,
            Self::Data(_) => ErrorKind::Data,
            Self::Operational(_) => ErrorKind::Operational,
            Self::Integrity(_) => ErrorKind::Integrity,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Programming(_) => ErrorKind::Programming,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::Database(_) => ErrorKind::Database,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
