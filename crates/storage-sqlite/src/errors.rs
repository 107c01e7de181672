//! Storage error type and its mapping onto core errors.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

use tillsync_core::errors::{DatabaseError, Error};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Query failed: {0}")]
    Query(#[from] DieselError),

    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("Connection failed: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Writer unavailable: {0}")]
    WriterUnavailable(String),

    #[error(transparent)]
    Core(#[from] Error),
}

fn is_busy(message: &str) -> bool {
    message.contains("database is locked") || message.contains("database is busy")
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Core(inner) => inner,
            StorageError::Query(DieselError::NotFound) => {
                Error::Database(DatabaseError::NotFound("record not found".to_string()))
            }
            StorageError::Query(DieselError::DatabaseError(kind, info)) => {
                let message = info.message().to_string();
                match kind {
                    DatabaseErrorKind::UniqueViolation => {
                        Error::Database(DatabaseError::UniqueViolation(message))
                    }
                    _ if is_busy(&message) => Error::Database(DatabaseError::Busy(message)),
                    _ => Error::Database(DatabaseError::Internal(message)),
                }
            }
            StorageError::Query(other) => {
                Error::Database(DatabaseError::Internal(other.to_string()))
            }
            StorageError::Pool(e) => Error::Database(DatabaseError::ConnectionFailed(e.to_string())),
            StorageError::Connection(e) => {
                Error::Database(DatabaseError::ConnectionFailed(e.to_string()))
            }
            StorageError::Migration(message) => {
                Error::Database(DatabaseError::MigrationFailed(message))
            }
            StorageError::WriterUnavailable(message) => {
                Error::Database(DatabaseError::Internal(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_keeps_its_identity() {
        let err: Error = StorageError::from(DieselError::NotFound).into();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn core_errors_pass_through_unchanged() {
        let err: Error = StorageError::Core(Error::unexpected("boom")).into();
        assert!(matches!(err, Error::Unexpected(ref m) if m == "boom"));
    }
}
