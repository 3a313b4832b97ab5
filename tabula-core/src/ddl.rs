//! DDL statement builders.
//!
//! Builders only produce SQL. Executing it and keeping the schema document
//! in step is the storage layer's job.

use crate::column::{ColumnDescriptor, ColumnType};
use crate::dialect::Dialect;
use crate::error::{IdentifierKind, StorageError, TabulaResult, ValidationError};
use crate::identifier::MAX_IDENTIFIER_LEN;

pub fn create_table(
    dialect: &dyn Dialect,
    physical: &str,
    columns: &[ColumnDescriptor],
) -> Result<String, ValidationError> {
    build_create(dialect, "CREATE TABLE", physical, columns)
}

pub fn create_table_if_not_exists(
    dialect: &dyn Dialect,
    physical: &str,
    columns: &[ColumnDescriptor],
) -> Result<String, ValidationError> {
    build_create(dialect, "CREATE TABLE IF NOT EXISTS", physical, columns)
}

fn build_create(
    dialect: &dyn Dialect,
    verb: &str,
    physical: &str,
    columns: &[ColumnDescriptor],
) -> Result<String, ValidationError> {
    let table = dialect.quote(IdentifierKind::Physical, physical)?;
    let fragments = columns
        .iter()
        .map(|column| dialect.column_ddl(column))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("{} {} ({})", verb, table, fragments.join(", ")))
}

pub fn drop_table(dialect: &dyn Dialect, physical: &str) -> Result<String, ValidationError> {
    Ok(format!(
        "DROP TABLE IF EXISTS {}",
        dialect.quote(IdentifierKind::Physical, physical)?
    ))
}

pub fn add_column(
    dialect: &dyn Dialect,
    physical: &str,
    column: &ColumnDescriptor,
) -> Result<String, ValidationError> {
    Ok(format!(
        "ALTER TABLE {} ADD COLUMN {}",
        dialect.quote(IdentifierKind::Physical, physical)?,
        dialect.column_ddl(column)?
    ))
}

/// `CREATE [UNIQUE] INDEX IF NOT EXISTS` over `columns` of `physical`.
pub fn create_index(
    dialect: &dyn Dialect,
    index_name: &str,
    physical: &str,
    columns: &[&str],
    unique: bool,
) -> Result<String, ValidationError> {
    let columns = columns
        .iter()
        .map(|column| dialect.quote(IdentifierKind::Column, column))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if unique { "UNIQUE " } else { "" },
        dialect.quote(IdentifierKind::Physical, index_name)?,
        dialect.quote(IdentifierKind::Physical, physical)?,
        columns.join(", ")
    ))
}

/// Native rename. Engines without it get a hard failure, never a rebuild.
pub fn rename_column(
    dialect: &dyn Dialect,
    physical: &str,
    old_name: &str,
    new_name: &str,
) -> TabulaResult<String> {
    if !dialect.capabilities().native_column_rename {
        return Err(StorageError::Unsupported {
            operation: "RENAME COLUMN".to_string(),
            dialect: dialect.name().to_string(),
        }
        .into());
    }
    Ok(format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        dialect.quote(IdentifierKind::Physical, physical)?,
        dialect.quote(IdentifierKind::Column, old_name)?,
        dialect.quote(IdentifierKind::Column, new_name)?
    ))
}

/// How a column drop will be carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropColumnPlan {
    /// A single `ALTER TABLE ... DROP COLUMN`.
    Native(String),
    /// Rebuild statements, to run inside one transaction.
    Rebuild(Vec<String>),
}

/// Plan dropping `dropped` from `physical`, given the columns that remain.
pub fn drop_column(
    dialect: &dyn Dialect,
    physical: &str,
    dropped: &str,
    remaining: &[ColumnDescriptor],
) -> Result<DropColumnPlan, ValidationError> {
    if dialect.capabilities().native_column_drop {
        return Ok(DropColumnPlan::Native(format!(
            "ALTER TABLE {} DROP COLUMN {}",
            dialect.quote(IdentifierKind::Physical, physical)?,
            dialect.quote(IdentifierKind::Column, dropped)?
        )));
    }
    rebuild_without_column(dialect, physical, remaining).map(DropColumnPlan::Rebuild)
}

/// Name of the scratch table used while rebuilding `physical`.
pub fn rebuild_table_name(physical: &str) -> String {
    let keep = physical.len().min(MAX_IDENTIFIER_LEN - 3);
    format!("rb_{}", &physical[..keep])
}

/// Create a scratch table with the remaining columns, copy every row,
/// drop the original and move the scratch table into its place.
///
/// When the engine has an implicit row id it is copied too, so row ids
/// handed out earlier stay valid. An integer primary key that aliases the
/// row id already carries it.
pub fn rebuild_without_column(
    dialect: &dyn Dialect,
    physical: &str,
    remaining: &[ColumnDescriptor],
) -> Result<Vec<String>, ValidationError> {
    if remaining.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "columns".to_string(),
        });
    }

    let scratch_name = rebuild_table_name(physical);
    let original = dialect.quote(IdentifierKind::Physical, physical)?;
    let scratch = dialect.quote(IdentifierKind::Physical, &scratch_name)?;

    let mut copied = remaining
        .iter()
        .map(|column| dialect.quote(IdentifierKind::Column, &column.name))
        .collect::<Result<Vec<_>, _>>()?;
    let pk_is_row_id = dialect.capabilities().integer_primary_key_is_row_id
        && remaining
            .iter()
            .any(|column| column.pk && column.column_type == ColumnType::Integer);
    if let Some(row_id) = dialect.implicit_row_id().filter(|_| !pk_is_row_id) {
        copied.insert(0, row_id.to_string());
    }
    let copied = copied.join(", ");

    Ok(vec![
        format!("DROP TABLE IF EXISTS {}", scratch),
        create_table(dialect, &scratch_name, remaining)?,
        format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            scratch, copied, copied, original
        ),
        format!("DROP TABLE {}", original),
        format!("ALTER TABLE {} RENAME TO {}", scratch, original),
    ])
}
