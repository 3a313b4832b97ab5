//! SQL dialect adapter.
//!
//! All engine differences live behind [`Dialect`]: type mapping, primary-key
//! syntax, placeholders, literals and the capability flags. Statement
//! builders consult these flags and never ask which engine they talk to.

use std::fmt;
use std::str::FromStr;

use crate::column::{ColumnDescriptor, ColumnType};
use crate::error::{ConfigError, IdentifierKind, ValidationError};
use crate::identifier;

/// What an engine can do natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `ALTER TABLE ... DROP COLUMN` is usable; otherwise tables are rebuilt.
    pub native_column_drop: bool,
    /// `ALTER TABLE ... RENAME COLUMN` is usable. There is no fallback.
    pub native_column_rename: bool,
    /// `INSERT ... RETURNING` hands back the new row's identifier.
    pub insert_returning: bool,
    /// Operator for case-insensitive `LIKE`, when the engine has one.
    pub case_insensitive_like: Option<&'static str>,
    /// An `INTEGER` primary key is the implicit row identifier itself.
    pub integer_primary_key_is_row_id: bool,
}

/// A SQL engine's syntax and capability profile.
pub trait Dialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Name of the engine's implicit per-row identifier, if it has one.
    fn implicit_row_id(&self) -> Option<&'static str>;

    /// Placeholder for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    /// Native type for a logical column type.
    fn physical_type(&self, column_type: ColumnType) -> &'static str;

    /// Type-and-constraint fragment for a primary-key column.
    fn primary_key_fragment(&self, column_type: ColumnType) -> String;

    fn boolean_literal(&self, value: bool) -> &'static str;

    fn blob_literal(&self, bytes: &[u8]) -> String;

    fn quote_char(&self) -> char {
        '"'
    }

    /// Validate and quote an identifier. The single choke point for
    /// embedding names into statement text.
    fn quote(&self, kind: IdentifierKind, name: &str) -> Result<String, ValidationError> {
        identifier::quote(self.quote_char(), kind, name)
    }

    /// Expression casting `expr` to text for pattern matching.
    fn text_cast(&self, expr: &str) -> String {
        format!("CAST({} AS TEXT)", expr)
    }

    /// DDL fragment for one column.
    fn column_ddl(&self, column: &ColumnDescriptor) -> Result<String, ValidationError> {
        let name = self.quote(IdentifierKind::Column, &column.name)?;
        if column.pk {
            return Ok(format!(
                "{} {}",
                name,
                self.primary_key_fragment(column.column_type)
            ));
        }

        let mut ddl = format!("{} {}", name, self.physical_type(column.column_type));
        if column.notnull {
            ddl.push_str(" NOT NULL");
        }
        if column.unique {
            ddl.push_str(" UNIQUE");
        }
        if let Some(default) = column.default_value()? {
            ddl.push_str(" DEFAULT ");
            ddl.push_str(&default.sql_literal(self));
        }
        Ok(ddl)
    }
}

// ============================================================================
// SQLITE
// ============================================================================

/// File-based engine. Integer primary keys alias the rowid, columns are
/// dropped by rebuilding the table and new ids come from
/// `last_insert_rowid()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_column_drop: false,
            native_column_rename: true,
            insert_returning: false,
            case_insensitive_like: None,
            integer_primary_key_is_row_id: true,
        }
    }

    fn implicit_row_id(&self) -> Option<&'static str> {
        Some("rowid")
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{}", index)
    }

    fn physical_type(&self, column_type: ColumnType) -> &'static str {
        column_type.as_str()
    }

    fn primary_key_fragment(&self, column_type: ColumnType) -> String {
        match column_type {
            ColumnType::Integer => "INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
            other => format!("{} PRIMARY KEY", self.physical_type(other)),
        }
    }

    fn boolean_literal(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }

    fn blob_literal(&self, bytes: &[u8]) -> String {
        format!("X'{}'", hex::encode(bytes))
    }
}

// ============================================================================
// POSTGRESQL
// ============================================================================

/// Client-server engine. Integer primary keys become sequences and every
/// DDL primitive is native.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_column_drop: true,
            native_column_rename: true,
            insert_returning: true,
            case_insensitive_like: Some("ILIKE"),
            integer_primary_key_is_row_id: false,
        }
    }

    fn implicit_row_id(&self) -> Option<&'static str> {
        None
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn physical_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "BIGINT",
            ColumnType::Real => "DOUBLE PRECISION",
            ColumnType::Blob => "BYTEA",
            ColumnType::Datetime => "TIMESTAMP",
            ColumnType::Boolean => "BOOLEAN",
        }
    }

    fn primary_key_fragment(&self, column_type: ColumnType) -> String {
        match column_type {
            ColumnType::Integer => "BIGSERIAL PRIMARY KEY".to_string(),
            other => format!("{} PRIMARY KEY", self.physical_type(other)),
        }
    }

    fn boolean_literal(&self, value: bool) -> &'static str {
        if value {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    fn blob_literal(&self, bytes: &[u8]) -> String {
        format!("'\\x{}'::bytea", hex::encode(bytes))
    }
}

// ============================================================================
// SELECTION
// ============================================================================

static SQLITE: SqliteDialect = SqliteDialect;
static POSTGRES: PostgresDialect = PostgresDialect;

/// Engine selector used by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DialectKind {
    #[default]
    Sqlite,
    Postgres,
}

impl DialectKind {
    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            DialectKind::Sqlite => &SQLITE,
            DialectKind::Postgres => &POSTGRES,
        }
    }
}

impl FromStr for DialectKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(DialectKind::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(DialectKind::Postgres),
            other => Err(ConfigError::InvalidValue {
                field: "db_engine".to_string(),
                value: other.to_string(),
                reason: "expected 'sqlite' or 'postgres'".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sqlite_integer_primary_key() -> Result<(), ValidationError> {
        let column = ColumnDescriptor::new("id", ColumnType::Integer).primary_key();
        assert_eq!(
            SqliteDialect.column_ddl(&column)?,
            "\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"
        );
        Ok(())
    }

    #[test]
    fn test_postgres_integer_primary_key() -> Result<(), ValidationError> {
        let column = ColumnDescriptor::new("id", ColumnType::Integer).primary_key();
        assert_eq!(
            PostgresDialect.column_ddl(&column)?,
            "\"id\" BIGSERIAL PRIMARY KEY"
        );
        Ok(())
    }

    #[test]
    fn test_text_primary_key_keeps_type() -> Result<(), ValidationError> {
        let column = ColumnDescriptor::new("code", ColumnType::Text).primary_key();
        assert_eq!(SqliteDialect.column_ddl(&column)?, "\"code\" TEXT PRIMARY KEY");
        Ok(())
    }

    #[test]
    fn test_postgres_type_remapping() {
        assert_eq!(PostgresDialect.physical_type(ColumnType::Blob), "BYTEA");
        assert_eq!(PostgresDialect.physical_type(ColumnType::Datetime), "TIMESTAMP");
        assert_eq!(SqliteDialect.physical_type(ColumnType::Blob), "BLOB");
    }

    #[test]
    fn test_constraints_and_default() -> Result<(), ValidationError> {
        let column = ColumnDescriptor::new("status", ColumnType::Text)
            .not_null()
            .unique()
            .with_default(json!("new"));
        assert_eq!(
            SqliteDialect.column_ddl(&column)?,
            "\"status\" TEXT NOT NULL UNIQUE DEFAULT 'new'"
        );

        let flag = ColumnDescriptor::new("active", ColumnType::Boolean).with_default(json!(true));
        assert_eq!(
            PostgresDialect.column_ddl(&flag)?,
            "\"active\" BOOLEAN DEFAULT TRUE"
        );
        Ok(())
    }

    #[test]
    fn test_column_ddl_rejects_bad_name() {
        let column = ColumnDescriptor::new("drop table", ColumnType::Text);
        assert!(SqliteDialect.column_ddl(&column).is_err());
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(SqliteDialect.placeholder(3), "?3");
        assert_eq!(PostgresDialect.placeholder(3), "$3");
    }

    #[test]
    fn test_dialect_kind_parse() -> Result<(), ConfigError> {
        assert_eq!("postgresql".parse::<DialectKind>()?, DialectKind::Postgres);
        assert_eq!(DialectKind::Sqlite.dialect().name(), "sqlite");
        assert!("mysql".parse::<DialectKind>().is_err());
        Ok(())
    }
}
