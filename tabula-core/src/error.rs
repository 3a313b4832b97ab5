//! Error types for Tabula operations

use std::fmt;
use thiserror::Error;

/// Which kind of identifier failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    /// Logical table name chosen by the owner.
    Table,
    /// Column name chosen by the owner.
    Column,
    /// Engine-level table name derived from owner and logical name.
    Physical,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierKind::Table => write!(f, "table"),
            IdentifierKind::Column => write!(f, "column"),
            IdentifierKind::Physical => write!(f, "physical table"),
        }
    }
}

/// Validation errors. Always the caller's fault, never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid {kind} name '{name}': {reason}")]
    InvalidIdentifier {
        kind: IdentifierKind,
        name: String,
        reason: String,
    },

    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Duplicate column name: {name}")]
    DuplicateColumn { name: String },

    #[error("Only one column can be set as Primary Key")]
    MultiplePrimaryKeys,

    #[error("Table '{name}' already exists")]
    TableAlreadyExists { name: String },

    #[error("Unknown column: {name}")]
    UnknownColumn { name: String },

    #[error("Cannot delete '{name}': a table needs at least one column")]
    LastColumn { name: String },

    #[error("Cannot delete primary key column '{name}'")]
    PrimaryKeyColumn { name: String },

    #[error("Constraint violation on {constraint}: {reason}")]
    ConstraintViolation { constraint: String, reason: String },
}

/// Lookup misses for tables, columns, rows and keys.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("Table '{name}' not found")]
    Table { name: String },

    #[error("Column '{name}' not found")]
    Column { name: String },

    #[error("Row not found")]
    Row { id: String },

    #[error("API key {id} not found")]
    ApiKey { id: i64 },
}

/// Credential failures. Checked before storage is touched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authentication credentials were not provided")]
    MissingCredential,

    #[error("Invalid or inactive API key")]
    InvalidCredential,

    #[error("User account is disabled")]
    OwnerDisabled,
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Statement failed: {message}")]
    Execution { message: String },

    /// The physical schema moved underneath a running statement.
    #[error("Table schema changed while the request ran, retry: {message}")]
    SchemaConflict { message: String },

    #[error("Database connection unavailable: {reason}")]
    Connection { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("{operation} is not supported by the {dialect} dialect")]
    Unsupported { operation: String, dialect: String },

    #[error("Corrupt metadata for {what}: {reason}")]
    CorruptMetadata { what: String, reason: String },

    #[error("Blocking task failed: {reason}")]
    TaskFailed { reason: String },
}

impl StorageError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::SchemaConflict { .. } | StorageError::Connection { .. }
        )
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Tabula errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TabulaError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl TabulaError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TabulaError::NotFound(_))
    }
}

/// Result type alias for Tabula operations.
pub type TabulaResult<T> = Result<T, TabulaError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_identifier_display() {
        let err = ValidationError::InvalidIdentifier {
            kind: IdentifierKind::Column,
            name: "bad name".to_string(),
            reason: "only letters, digits and underscore are allowed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("column"));
        assert!(msg.contains("bad name"));
    }

    #[test]
    fn test_multiple_primary_keys_message() {
        assert_eq!(
            ValidationError::MultiplePrimaryKeys.to_string(),
            "Only one column can be set as Primary Key"
        );
    }

    #[test]
    fn test_schema_conflict_is_retryable() {
        let conflict = StorageError::SchemaConflict {
            message: "no such column: price".to_string(),
        };
        assert!(conflict.is_retryable());

        let failed = StorageError::Execution {
            message: "UNIQUE constraint failed".to_string(),
        };
        assert!(!failed.is_retryable());
    }

    #[test]
    fn test_master_error_from_conversions() {
        let err: TabulaError = NotFoundError::Table {
            name: "orders".to_string(),
        }
        .into();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("orders"));

        let err: TabulaError = AuthError::OwnerDisabled.into();
        assert!(matches!(err, TabulaError::Auth(AuthError::OwnerDisabled)));
    }
}
