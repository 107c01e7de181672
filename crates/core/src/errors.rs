//! Error types shared by every tillsync layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Rejected: {0}")]
    Rejected(#[from] BusinessRejection),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Stable machine-readable code, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Database(DatabaseError::NotFound(_)) => "NOT_FOUND",
            Error::Database(DatabaseError::Busy(_)) => "DATABASE_BUSY",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Rejected(rejection) => rejection.code(),
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Unexpected(_) => "INTERNAL",
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Error::Unexpected(message.into())
    }
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database is busy: {0}")]
    Busy(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Internal database error: {0}")]
    Internal(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid idempotency key: {0}")]
    InvalidIdempotencyKey(String),
}

impl ValidationError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ValidationError::InvalidInput(message.into())
    }
}

/// Refusal of an operation by a business rule. Terminal: the same request
/// is never retried unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusinessRejection {
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: String,
        requested: i64,
        available: i64,
    },

    #[error("Unknown product {product_id}")]
    UnknownProduct { product_id: String },

    #[error("Cash session {session_id} is not open")]
    SessionNotOpen { session_id: String },

    #[error("Coworking session {coworking_session_id} is not active")]
    CoworkingNotActive { coworking_session_id: String },

    #[error("{collection} entity {entity_id} already exists")]
    DuplicateEntity {
        collection: String,
        entity_id: String,
    },

    #[error("Idempotency key {key} was already used for a different request")]
    IdempotencyKeyReused { key: String },
}

impl BusinessRejection {
    pub fn code(&self) -> &'static str {
        match self {
            BusinessRejection::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            BusinessRejection::UnknownProduct { .. } => "UNKNOWN_PRODUCT",
            BusinessRejection::SessionNotOpen { .. } => "SESSION_NOT_OPEN",
            BusinessRejection::CoworkingNotActive { .. } => "COWORKING_NOT_ACTIVE",
            BusinessRejection::DuplicateEntity { .. } => "DUPLICATE_ENTITY",
            BusinessRejection::IdempotencyKeyReused { .. } => "IDEMPOTENCY_KEY_REUSED",
        }
    }
}
