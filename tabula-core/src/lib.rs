//! Tabula Core - Dynamic Table Types
//!
//! Pure building blocks for user-defined tables: identifier validation,
//! column and table descriptors, typed cell values, the SQL dialect adapter,
//! DDL statement builders, the row query compiler and row statement builders.
//!
//! Nothing in this crate performs I/O. Every SQL string produced here embeds
//! identifiers only after they passed [`identifier::quote`], and every value
//! travels as a bound parameter.

pub mod activity;
pub mod column;
pub mod credential;
pub mod ddl;
pub mod dialect;
pub mod dml;
pub mod error;
pub mod identifier;
pub mod principal;
pub mod query;
pub mod value;

use chrono::{DateTime, Utc};

pub use activity::{ActionKind, ActivityRecord};
pub use column::{validate_column_list, ColumnDescriptor, ColumnType, TableDescriptor};
pub use credential::{ApiKeyRecord, API_KEY_PREFIX};
pub use ddl::DropColumnPlan;
pub use dialect::{Capabilities, Dialect, DialectKind, PostgresDialect, SqliteDialect};
pub use dml::{InsertStatement, Projection, RowTarget, Statement};
pub use error::{
    AuthError, ConfigError, IdentifierKind, NotFoundError, StorageError, TabulaError,
    TabulaResult, ValidationError,
};
pub use principal::{
    OwnerDirectory, OwnerId, Principal, RequestContext, Source, StaticOwnerDirectory,
};
pub use query::{CompiledQuery, FilterOperator, RowPage, RowQuery, SortOrder};
pub use value::{Row, Value};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
