//! Row statement builders: insert, update, delete and single-row select.

use serde_json::{Map, Value as JsonValue};

use crate::column::{ColumnType, TableDescriptor};
use crate::dialect::Dialect;
use crate::error::{IdentifierKind, ValidationError};
use crate::value::{Row, Value};

/// SQL text plus its bound parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Output column layout of a select, used to map result tuples to rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Projection {
    names: Vec<String>,
    types: Vec<Option<ColumnType>>,
}

impl Projection {
    /// Declared columns in stored order, followed by the implicit row id.
    pub fn for_table(dialect: &dyn Dialect, table: &TableDescriptor) -> Result<(String, Self), ValidationError> {
        let mut select = Vec::with_capacity(table.columns.len() + 1);
        let mut projection = Projection::default();

        for column in &table.columns {
            select.push(dialect.quote(IdentifierKind::Column, &column.name)?);
            projection.names.push(column.name.clone());
            projection.types.push(Some(column.column_type));
        }
        if let Some(row_id) = dialect.implicit_row_id() {
            select.push(row_id.to_string());
            projection.names.push(row_id.to_string());
            projection.types.push(Some(ColumnType::Integer));
        }

        Ok((select.join(", "), projection))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Map one result tuple to a row, conforming values to declared types.
    pub fn row_from(&self, values: Vec<Value>) -> Row {
        let mut row = Row::new();
        for ((name, column_type), value) in self.names.iter().zip(&self.types).zip(values) {
            let value = match column_type {
                Some(column_type) => value.conform(*column_type),
                None => value,
            };
            row.push(name.clone(), value);
        }
        row
    }
}

// ============================================================================
// ROW IDENTITY
// ============================================================================

/// One way of addressing a single row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowTarget {
    /// The engine's implicit row identifier.
    ImplicitRowId(i64),
    /// The declared primary-key column.
    PrimaryKey(Value),
}

/// Resolve a caller-supplied row id into the targets to try, in order.
///
/// A purely numeric id is first tried against the implicit row identifier
/// when the engine has one; the declared primary key follows unless it is
/// the same thing as the implicit identifier. An empty list means no row
/// can carry this id, which callers report as not found.
pub fn row_targets(
    dialect: &dyn Dialect,
    table: &TableDescriptor,
    raw_id: &str,
) -> Result<Vec<RowTarget>, ValidationError> {
    let mut targets = Vec::with_capacity(2);
    let numeric = !raw_id.is_empty() && raw_id.chars().all(|c| c.is_ascii_digit());

    if dialect.implicit_row_id().is_some() && numeric {
        if let Ok(id) = raw_id.parse::<i64>() {
            targets.push(RowTarget::ImplicitRowId(id));
        }
    }

    if let Some(pk) = table.primary_key() {
        let aliases_row_id = !targets.is_empty()
            && pk.column_type == ColumnType::Integer
            && dialect.capabilities().integer_primary_key_is_row_id;
        if !aliases_row_id {
            match Value::from_text(pk.column_type, &pk.name, raw_id) {
                Ok(value) => targets.push(RowTarget::PrimaryKey(value)),
                Err(err) if targets.is_empty() => return Err(err),
                Err(_) => {}
            }
        }
    }

    Ok(targets)
}

fn target_predicate(
    dialect: &dyn Dialect,
    table: &TableDescriptor,
    target: &RowTarget,
    placeholder: String,
) -> Result<(String, Value), ValidationError> {
    match target {
        RowTarget::ImplicitRowId(id) => {
            let row_id = dialect.implicit_row_id().ok_or_else(|| ValidationError::InvalidValue {
                field: "row_id".to_string(),
                reason: format!("the {} dialect has no implicit row id", dialect.name()),
            })?;
            Ok((format!("{} = {}", row_id, placeholder), Value::Integer(*id)))
        }
        RowTarget::PrimaryKey(value) => {
            let pk = table.primary_key().ok_or_else(|| ValidationError::InvalidValue {
                field: "row_id".to_string(),
                reason: format!("table '{}' has no primary key", table.name),
            })?;
            let column = dialect.quote(IdentifierKind::Column, &pk.name)?;
            Ok((format!("{} = {}", column, placeholder), value.clone()))
        }
    }
}

// ============================================================================
// BUILDERS
// ============================================================================

/// Coerce a request body against the table's columns, keeping table order.
pub fn coerce_values(
    table: &TableDescriptor,
    data: &Map<String, JsonValue>,
) -> Result<Vec<(String, Value)>, ValidationError> {
    if let Some(unknown) = data.keys().find(|key| table.column(key).is_none()) {
        return Err(ValidationError::UnknownColumn {
            name: unknown.clone(),
        });
    }

    table
        .columns
        .iter()
        .filter_map(|column| data.get(&column.name).map(|json| (column, json)))
        .map(|(column, json)| {
            Value::from_json(column.column_type, &column.name, json)
                .map(|value| (column.name.clone(), value))
        })
        .collect()
}

/// An insert plus whether it hands back the new identifier itself.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub statement: Statement,
    pub returns_id: bool,
}

pub fn insert(
    dialect: &dyn Dialect,
    table: &TableDescriptor,
    values: Vec<(String, Value)>,
) -> Result<InsertStatement, ValidationError> {
    let physical = dialect.quote(IdentifierKind::Physical, &table.physical_name)?;

    let mut sql = if values.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", physical)
    } else {
        let mut columns = Vec::with_capacity(values.len());
        let mut placeholders = Vec::with_capacity(values.len());
        for (index, (name, _)) in values.iter().enumerate() {
            columns.push(dialect.quote(IdentifierKind::Column, name)?);
            placeholders.push(dialect.placeholder(index + 1));
        }
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            physical,
            columns.join(", "),
            placeholders.join(", ")
        )
    };

    let mut returns_id = false;
    if dialect.capabilities().insert_returning {
        if let Some(pk) = table.primary_key() {
            sql.push_str(" RETURNING ");
            sql.push_str(&dialect.quote(IdentifierKind::Column, &pk.name)?);
            returns_id = true;
        }
    }

    let params = values.into_iter().map(|(_, value)| value).collect();
    Ok(InsertStatement {
        statement: Statement::with_params(sql, params),
        returns_id,
    })
}

pub fn update(
    dialect: &dyn Dialect,
    table: &TableDescriptor,
    target: &RowTarget,
    values: &[(String, Value)],
) -> Result<Statement, ValidationError> {
    if values.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "data".to_string(),
        });
    }

    let physical = dialect.quote(IdentifierKind::Physical, &table.physical_name)?;
    let mut assignments = Vec::with_capacity(values.len());
    let mut params = Vec::with_capacity(values.len() + 1);
    for (name, value) in values {
        params.push(value.clone());
        assignments.push(format!(
            "{} = {}",
            dialect.quote(IdentifierKind::Column, name)?,
            dialect.placeholder(params.len())
        ));
    }

    let (predicate, id) = target_predicate(dialect, table, target, dialect.placeholder(params.len() + 1))?;
    params.push(id);

    Ok(Statement::with_params(
        format!("UPDATE {} SET {} WHERE {}", physical, assignments.join(", "), predicate),
        params,
    ))
}

pub fn delete(
    dialect: &dyn Dialect,
    table: &TableDescriptor,
    target: &RowTarget,
) -> Result<Statement, ValidationError> {
    let physical = dialect.quote(IdentifierKind::Physical, &table.physical_name)?;
    let (predicate, id) = target_predicate(dialect, table, target, dialect.placeholder(1))?;
    Ok(Statement::with_params(
        format!("DELETE FROM {} WHERE {}", physical, predicate),
        vec![id],
    ))
}

pub fn select_one(
    dialect: &dyn Dialect,
    table: &TableDescriptor,
    target: &RowTarget,
) -> Result<(Statement, Projection), ValidationError> {
    let physical = dialect.quote(IdentifierKind::Physical, &table.physical_name)?;
    let (columns, projection) = Projection::for_table(dialect, table)?;
    let (predicate, id) = target_predicate(dialect, table, target, dialect.placeholder(1))?;
    Ok((
        Statement::with_params(
            format!("SELECT {} FROM {} WHERE {} LIMIT 1", columns, physical, predicate),
            vec![id],
        ),
        projection,
    ))
}

/// Every row in storage order, declared columns only. Used by export.
pub fn select_all(
    dialect: &dyn Dialect,
    table: &TableDescriptor,
) -> Result<(Statement, Projection), ValidationError> {
    let physical = dialect.quote(IdentifierKind::Physical, &table.physical_name)?;
    let mut columns = Vec::with_capacity(table.columns.len());
    let mut projection = Projection::default();
    for column in &table.columns {
        columns.push(dialect.quote(IdentifierKind::Column, &column.name)?);
        projection.names.push(column.name.clone());
        projection.types.push(Some(column.column_type));
    }
    Ok((
        Statement::new(format!("SELECT {} FROM {}", columns.join(", "), physical)),
        projection,
    ))
}

pub fn count_all(dialect: &dyn Dialect, table: &TableDescriptor) -> Result<Statement, ValidationError> {
    let physical = dialect.quote(IdentifierKind::Physical, &table.physical_name)?;
    Ok(Statement::new(format!("SELECT COUNT(*) FROM {}", physical)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnDescriptor;
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use crate::principal::OwnerId;
    use chrono::Utc;
    use serde_json::json;

    fn products() -> TableDescriptor {
        TableDescriptor::new(
            OwnerId(1),
            "products",
            vec![
                ColumnDescriptor::new("id", ColumnType::Integer).primary_key(),
                ColumnDescriptor::new("name", ColumnType::Text),
                ColumnDescriptor::new("price", ColumnType::Real),
            ],
            Utc::now(),
        )
        .expect("valid table")
    }

    fn notes() -> TableDescriptor {
        TableDescriptor::new(
            OwnerId(1),
            "notes",
            vec![
                ColumnDescriptor::new("code", ColumnType::Text).primary_key(),
                ColumnDescriptor::new("body", ColumnType::Text),
            ],
            Utc::now(),
        )
        .expect("valid table")
    }

    #[test]
    fn test_coerce_values_rejects_unknown_column() {
        let data = json!({"name": "pen", "colour": "red"});
        let err = coerce_values(&products(), data.as_object().expect("object")).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownColumn {
                name: "colour".to_string()
            }
        );
    }

    #[test]
    fn test_insert_sqlite_has_no_returning() -> Result<(), ValidationError> {
        let table = products();
        let data = json!({"price": 1.5, "name": "pen"});
        let values = coerce_values(&table, data.as_object().expect("object"))?;
        let insert = insert(&SqliteDialect, &table, values)?;
        assert_eq!(
            insert.statement.sql,
            "INSERT INTO \"u1_products\" (\"name\", \"price\") VALUES (?1, ?2)"
        );
        assert_eq!(
            insert.statement.params,
            vec![Value::Text("pen".to_string()), Value::Real(1.5)]
        );
        assert!(!insert.returns_id);
        Ok(())
    }

    #[test]
    fn test_insert_postgres_returns_primary_key() -> Result<(), ValidationError> {
        let table = products();
        let insert = insert(&PostgresDialect, &table, vec![("name".to_string(), Value::Text("a".to_string()))])?;
        assert!(insert.statement.sql.ends_with("VALUES ($1) RETURNING \"id\""));
        assert!(insert.returns_id);
        Ok(())
    }

    #[test]
    fn test_insert_without_values_uses_defaults() -> Result<(), ValidationError> {
        let insert = insert(&SqliteDialect, &products(), Vec::new())?;
        assert_eq!(insert.statement.sql, "INSERT INTO \"u1_products\" DEFAULT VALUES");
        Ok(())
    }

    #[test]
    fn test_row_targets_integer_pk_on_sqlite_is_row_id() -> Result<(), ValidationError> {
        let targets = row_targets(&SqliteDialect, &products(), "7")?;
        assert_eq!(targets, vec![RowTarget::ImplicitRowId(7)]);
        Ok(())
    }

    #[test]
    fn test_row_targets_text_pk_retries_after_row_id() -> Result<(), ValidationError> {
        let targets = row_targets(&SqliteDialect, &notes(), "42")?;
        assert_eq!(
            targets,
            vec![
                RowTarget::ImplicitRowId(42),
                RowTarget::PrimaryKey(Value::Text("42".to_string()))
            ]
        );

        let targets = row_targets(&SqliteDialect, &notes(), "abc")?;
        assert_eq!(targets, vec![RowTarget::PrimaryKey(Value::Text("abc".to_string()))]);
        Ok(())
    }

    #[test]
    fn test_row_targets_keyless_table_without_row_id_is_empty() -> Result<(), ValidationError> {
        let table = TableDescriptor::new(
            OwnerId(1),
            "log",
            vec![ColumnDescriptor::new("line", ColumnType::Text)],
            Utc::now(),
        )
        .expect("valid table");
        assert!(row_targets(&PostgresDialect, &table, "1")?.is_empty());
        assert!(row_targets(&SqliteDialect, &table, "abc")?.is_empty());
        assert_eq!(row_targets(&SqliteDialect, &table, "1")?, vec![RowTarget::ImplicitRowId(1)]);
        Ok(())
    }

    #[test]
    fn test_row_targets_postgres_uses_primary_key() -> Result<(), ValidationError> {
        let targets = row_targets(&PostgresDialect, &products(), "9")?;
        assert_eq!(targets, vec![RowTarget::PrimaryKey(Value::Integer(9))]);
        assert!(row_targets(&PostgresDialect, &products(), "nine").is_err());
        Ok(())
    }

    #[test]
    fn test_update_and_delete_sql() -> Result<(), ValidationError> {
        let table = products();
        let update = update(
            &SqliteDialect,
            &table,
            &RowTarget::ImplicitRowId(3),
            &[("name".to_string(), Value::Text("cap".to_string()))],
        )?;
        assert_eq!(update.sql, "UPDATE \"u1_products\" SET \"name\" = ?1 WHERE rowid = ?2");
        assert_eq!(update.params.len(), 2);

        let delete = delete(&PostgresDialect, &table, &RowTarget::PrimaryKey(Value::Integer(3)))?;
        assert_eq!(delete.sql, "DELETE FROM \"u1_products\" WHERE \"id\" = $1");
        Ok(())
    }

    #[test]
    fn test_update_requires_values() {
        let err = update(&SqliteDialect, &products(), &RowTarget::ImplicitRowId(1), &[]).unwrap_err();
        assert!(matches!(err, ValidationError::RequiredFieldMissing { .. }));
    }

    #[test]
    fn test_projection_appends_row_id_and_conforms() -> Result<(), ValidationError> {
        let (columns, projection) = Projection::for_table(&SqliteDialect, &products())?;
        assert_eq!(columns, "\"id\", \"name\", \"price\", rowid");

        let row = projection.row_from(vec![
            Value::Integer(1),
            Value::Text("pen".to_string()),
            Value::Integer(2),
            Value::Integer(1),
        ]);
        assert_eq!(row.get("price"), Some(&Value::Real(2.0)));
        assert_eq!(row.get("rowid"), Some(&Value::Integer(1)));
        Ok(())
    }
}
