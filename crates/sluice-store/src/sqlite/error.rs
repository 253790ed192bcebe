// ABOUTME: Maps rusqlite errors onto the sluice persistence error taxonomy.
// ABOUTME: Version uniqueness violations become Conflict; every other constraint failure is Integrity.

use rusqlite::ErrorCode;
use sluice_core::PersistenceError;

/// Translate a rusqlite error into exactly one persistence error kind.
pub(crate) fn translate(err: rusqlite::Error) -> PersistenceError {
    let message = err.to_string();

    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            // SQLite reports the failing columns, not the constraint name.
            ErrorCode::ConstraintViolation if message.contains(".originator_version") => {
                PersistenceError::Conflict(message)
            }
            ErrorCode::ConstraintViolation => PersistenceError::Integrity(message),
            ErrorCode::TypeMismatch | ErrorCode::TooBig | ErrorCode::ParameterOutOfRange => {
                PersistenceError::Data(message)
            }
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::OutOfMemory
            | ErrorCode::SystemIoFailure
            | ErrorCode::DiskFull
            | ErrorCode::CannotOpen
            | ErrorCode::FileLockingProtocolFailed
            | ErrorCode::OperationInterrupted
            | ErrorCode::OperationAborted
            | ErrorCode::PermissionDenied
            | ErrorCode::ReadOnly
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::NoLargeFileSupport => PersistenceError::Operational(message),
            ErrorCode::InternalMalfunction => PersistenceError::Internal(message),
            ErrorCode::ApiMisuse => PersistenceError::Interface(message),
            ErrorCode::AuthorizationForStatementDenied
            | ErrorCode::SchemaChanged
            | ErrorCode::Unknown => PersistenceError::Programming(message),
            _ => PersistenceError::Database(message),
        },
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::ToSqlConversionFailure(..)
        | rusqlite::Error::IntegralValueOutOfRange(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::Utf8Error(..)
        | rusqlite::Error::NulError(..) => PersistenceError::Data(message),
        rusqlite::Error::InvalidParameterCount(..)
        | rusqlite::Error::InvalidParameterName(..)
        | rusqlite::Error::InvalidColumnIndex(..)
        | rusqlite::Error::InvalidColumnName(..)
        | rusqlite::Error::InvalidQuery
        | rusqlite::Error::MultipleStatement
        | rusqlite::Error::ExecuteReturnedResults
        | rusqlite::Error::QueryReturnedNoRows
        | rusqlite::Error::StatementChangedRows(..) => PersistenceError::Programming(message),
        rusqlite::Error::InvalidPath(..) | rusqlite::Error::SqliteSingleThreadedMode => {
            PersistenceError::Interface(message)
        }
        _ => PersistenceError::Other(message),
    }
}
