// ABOUTME: Errors raised by the administrative operations, worded for operators.
// ABOUTME: Selection errors list what is known so the operator can correct the request.

use sluice_core::{ErrorKind, PersistenceError};
use thiserror::Error;

/// Errors that can occur while resetting or synchronizing followers.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Unknown follower: {follower}. The known followers are: {}.", .known.join(", "))]
    UnknownFollower { follower: String, known: Vec<String> },

    #[error(
        "{follower} does not (currently) track {upstream}. Its known upstream apps are: {}.",
        .known.join(", ")
    )]
    UnknownUpstream {
        follower: String,
        upstream: String,
        known: Vec<String>,
    },

    #[error(
        "{follower} does not (currently) track: {}. Its known upstream apps are: {}.",
        .upstreams.join(", "),
        .known.join(", ")
    )]
    UnknownUpstreams {
        follower: String,
        upstreams: Vec<String>,
        known: Vec<String>,
    },

    #[error(
        "Unknown followers selected: {}. The known followers are: {}.",
        .unknown.join(", "),
        .known.join(", ")
    )]
    UnknownFollowers {
        unknown: Vec<String>,
        known: Vec<String>,
    },

    #[error("synchronization of {follower} aborted: {source}")]
    SyncAborted {
        follower: String,
        #[source]
        source: SyncError,
    },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Why synchronizing one follower stopped.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{follower} rejected notification {notification_id} from {leader}: {message}")]
    Rejected {
        follower: String,
        leader: String,
        notification_id: i64,
        message: String,
    },

    #[error("{follower} follows {leader}, which has no registered feed")]
    UnknownLeader { follower: String, leader: String },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl SyncError {
    /// Failures that stop one follower but let the others carry on.
    pub fn is_expected(&self) -> bool {
        match self {
            Self::Rejected { .. } => true,
            Self::UnknownLeader { .. } => false,
            Self::Persistence(err) => matches!(
                err.kind(),
                ErrorKind::Conflict | ErrorKind::Integrity | ErrorKind::Data
            ),
        }
    }

    /// Short name of the failure, used in verbose operator output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "PolicyRejection",
            Self::UnknownLeader { .. } => "UnknownLeader",
            Self::Persistence(err) => match err.kind() {
                ErrorKind::Conflict => "ConflictError",
                ErrorKind::Integrity => "IntegrityError",
                ErrorKind::Data => "DataError",
                ErrorKind::Interface => "InterfaceError",
                ErrorKind::Operational => "OperationalError",
                ErrorKind::Internal => "InternalError",
                ErrorKind::Programming => "ProgrammingError",
                ErrorKind::NotSupported => "NotSupportedError",
                ErrorKind::Database => "DatabaseError",
                ErrorKind::Other => "PersistenceError",
            },
        }
    }
}
