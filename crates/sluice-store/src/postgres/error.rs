// ABOUTME: Maps sqlx errors onto the sluice persistence error taxonomy.
// ABOUTME: Uses the violated constraint's name to tell version conflicts from other integrity failures.

use sluice_core::{PersistenceError, RecordKind};
use sqlx::error::ErrorKind;

/// Translate a sqlx error into exactly one persistence error kind.
pub(crate) fn translate(err: sqlx::Error) -> PersistenceError {
    let message = err.to_string();

    match &err {
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::UniqueViolation if db.constraint().is_some_and(is_version_constraint) => {
                PersistenceError::Conflict(message)
            }
            ErrorKind::UniqueViolation
            | ErrorKind::ForeignKeyViolation
            | ErrorKind::NotNullViolation
            | ErrorKind::CheckViolation => PersistenceError::Integrity(message),
            _ => from_sqlstate(db.code().as_deref().unwrap_or_default(), message),
        },
        sqlx::Error::Configuration(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolClosed => PersistenceError::Interface(message),
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => PersistenceError::Operational(message),
        sqlx::Error::WorkerCrashed => PersistenceError::Internal(message),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::Encode(_) => {
            PersistenceError::Data(message)
        }
        sqlx::Error::RowNotFound
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_) => PersistenceError::Programming(message),
        _ => PersistenceError::Other(message),
    }
}

fn is_version_constraint(name: &str) -> bool {
    name == RecordKind::Events.version_constraint()
        || name == RecordKind::Snapshots.version_constraint()
}

/// Classify a server error by its SQLSTATE class.
fn from_sqlstate(code: &str, message: String) -> PersistenceError {
    match code.get(..2) {
        Some("22") => PersistenceError::Data(message),
        Some("23") => PersistenceError::Integrity(message),
        Some("08" | "40" | "53" | "55" | "57" | "58") => PersistenceError::Operational(message),
        Some("XX") => PersistenceError::Internal(message),
        Some("26" | "34" | "42") => PersistenceError::Programming(message),
        Some("0A") => PersistenceError::NotSupported(message),
        _ => PersistenceError::Database(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::ErrorKind as Kind;

    #[test]
    fn sqlstate_classes() {
        let kind = |code: &str| from_sqlstate(code, "boom".to_string()).kind();
        assert_eq!(kind("22003"), Kind::Data);
        assert_eq!(kind("23505"), Kind::Integrity);
        assert_eq!(kind("40P01"), Kind::Operational);
        assert_eq!(kind("57014"), Kind::Operational);
        assert_eq!(kind("XX000"), Kind::Internal);
        assert_eq!(kind("42P01"), Kind::Programming);
        assert_eq!(kind("0A000"), Kind::NotSupported);
        assert_eq!(kind("P0001"), Kind::Database);
        assert_eq!(kind(""), Kind::Database);
    }

    #[test]
    fn client_errors() {
        assert_eq!(translate(sqlx::Error::PoolTimedOut).kind(), Kind::Operational);
        assert_eq!(translate(sqlx::Error::PoolClosed).kind(), Kind::Interface);
        assert_eq!(translate(sqlx::Error::RowNotFound).kind(), Kind::Programming);
        assert_eq!(
            translate(sqlx::Error::ColumnNotFound("state".into())).kind(),
            Kind::Programming
        );
        assert_eq!(translate(sqlx::Error::WorkerCrashed).kind(), Kind::Internal);
    }

    #[test]
    fn version_constraints_are_recognised() {
        assert!(is_version_constraint("stored_events_version_key"));
        assert!(is_version_constraint("snapshots_version_key"));
        assert!(!is_version_constraint("notification_tracking_key"));
    }
}
