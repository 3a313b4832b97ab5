//! Row CRUD engine and list queries.

use serde_json::{Map, Value as JsonValue};
use tabula_core::dml::{self, RowTarget};
use tabula_core::query::{self, CompiledQuery};
use tabula_core::{NotFoundError, Row, RowPage, RowQuery, TableDescriptor, TabulaResult, Value};
use tracing::{debug, warn};

use crate::backend::SharedBackend;

/// Result of a list request, including filter keys that had no effect.
#[derive(Debug, Clone, PartialEq)]
pub struct RowListing {
    pub page: RowPage,
    pub ignored_filters: Vec<String>,
}

#[derive(Clone)]
pub struct RowEngine {
    backend: SharedBackend,
}

impl RowEngine {
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// Count and fetch one page. Both statements share the same WHERE clause.
    pub async fn list(&self, table: &TableDescriptor, request: &RowQuery) -> TabulaResult<RowListing> {
        let CompiledQuery {
            count,
            select,
            projection,
            page,
            limit,
            ignored_filters,
            ..
        } = query::compile(self.backend.dialect(), table, request)?;

        if !ignored_filters.is_empty() {
            warn!(table = %table.name, ignored = ?ignored_filters, "filters ignored");
        }
        debug!(table = %table.name, sql = %select.sql, "compiled row query");

        let total = self.backend.query(&count).await?.scalar_u64()?;
        let rows = self
            .backend
            .query(&select)
            .await?
            .rows
            .into_iter()
            .map(|values| projection.row_from(values))
            .collect();

        Ok(RowListing {
            page: RowPage::new(rows, total, page, limit),
            ignored_filters,
        })
    }

    /// Total number of rows in the table.
    pub async fn count(&self, table: &TableDescriptor) -> TabulaResult<u64> {
        let statement = dml::count_all(self.backend.dialect(), table)?;
        self.backend.query(&statement).await?.scalar_u64()
    }

    /// Every row, declared columns only, in storage order.
    pub async fn all(&self, table: &TableDescriptor) -> TabulaResult<Vec<Row>> {
        let (statement, projection) = dml::select_all(self.backend.dialect(), table)?;
        Ok(self
            .backend
            .query(&statement)
            .await?
            .rows
            .into_iter()
            .map(|values| projection.row_from(values))
            .collect())
    }

    /// Fetch one row, trying each identity path in turn.
    pub async fn get(&self, table: &TableDescriptor, raw_id: &str) -> TabulaResult<Row> {
        let dialect = self.backend.dialect();
        for target in dml::row_targets(dialect, table, raw_id)? {
            let (statement, projection) = dml::select_one(dialect, table, &target)?;
            if let Some(values) = self.backend.query(&statement).await?.rows.into_iter().next() {
                return Ok(projection.row_from(values));
            }
        }
        Err(NotFoundError::Row {
            id: raw_id.to_string(),
        }
        .into())
    }

    /// Insert one row and return its identifier, if the engine reports one.
    pub async fn insert(
        &self,
        table: &TableDescriptor,
        data: &Map<String, JsonValue>,
    ) -> TabulaResult<Option<Value>> {
        let values = dml::coerce_values(table, data)?;
        let insert = dml::insert(self.backend.dialect(), table, values)?;
        self.backend
            .insert(&insert.statement, insert.returns_id)
            .await
    }

    /// Update one row. Zero affected rows is not an error.
    pub async fn update(
        &self,
        table: &TableDescriptor,
        raw_id: &str,
        data: &Map<String, JsonValue>,
    ) -> TabulaResult<u64> {
        let values = dml::coerce_values(table, data)?;
        let dialect = self.backend.dialect();
        let targets = dml::row_targets(dialect, table, raw_id)?;
        // Build every statement first so bad input fails before any write.
        let statements = targets
            .iter()
            .map(|target| dml::update(dialect, table, target, &values))
            .collect::<Result<Vec<_>, _>>()?;
        self.first_affecting(table, &targets, statements).await
    }

    /// Delete one row. Zero affected rows is not an error.
    pub async fn delete(&self, table: &TableDescriptor, raw_id: &str) -> TabulaResult<u64> {
        let dialect = self.backend.dialect();
        let targets = dml::row_targets(dialect, table, raw_id)?;
        let statements = targets
            .iter()
            .map(|target| dml::delete(dialect, table, target))
            .collect::<Result<Vec<_>, _>>()?;
        self.first_affecting(table, &targets, statements).await
    }

    /// Run statements in order until one touches a row.
    async fn first_affecting(
        &self,
        table: &TableDescriptor,
        targets: &[RowTarget],
        statements: Vec<dml::Statement>,
    ) -> TabulaResult<u64> {
        for (target, statement) in targets.iter().zip(statements) {
            let affected = self.backend.execute(&statement).await?;
            if affected > 0 {
                return Ok(affected);
            }
            debug!(table = %table.name, ?target, "no row matched, trying next identity");
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqliteBackend;
    use crate::bootstrap::bootstrap;
    use crate::catalog::SchemaStore;
    use crate::ddl_engine::DdlEngine;
    use serde_json::json;
    use std::sync::Arc;
    use tabula_core::{ColumnDescriptor, ColumnType, OwnerId, TabulaError, ValidationError};

    fn object(value: JsonValue) -> Map<String, JsonValue> {
        match value {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        }
    }

    async fn setup(columns: Vec<ColumnDescriptor>) -> TabulaResult<(RowEngine, TableDescriptor)> {
        let backend: SharedBackend = Arc::new(SqliteBackend::in_memory()?);
        bootstrap(backend.as_ref()).await?;
        let ddl = DdlEngine::new(Arc::clone(&backend), SchemaStore::new(Arc::clone(&backend)));
        let table = ddl.create_table(OwnerId(1), "things", columns).await?;
        Ok((RowEngine::new(backend), table))
    }

    #[tokio::test]
    async fn test_insert_then_get_round_trip() -> TabulaResult<()> {
        let (rows, table) = setup(vec![
            ColumnDescriptor::new("id", ColumnType::Integer).primary_key(),
            ColumnDescriptor::new("name", ColumnType::Text),
            ColumnDescriptor::new("active", ColumnType::Boolean),
        ])
        .await?;

        let id = rows
            .insert(&table, &object(json!({"name": "widget", "active": true})))
            .await?;
        assert_eq!(id, Some(Value::Integer(1)));

        let row = rows.get(&table, "1").await?;
        assert_eq!(row.get("name"), Some(&Value::Text("widget".to_string())));
        assert_eq!(row.get("active"), Some(&Value::Boolean(true)));
        assert!(rows.get(&table, "2").await.unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_text_primary_key_falls_back_from_rowid() -> TabulaResult<()> {
        let (rows, table) = setup(vec![
            ColumnDescriptor::new("code", ColumnType::Text).primary_key(),
            ColumnDescriptor::new("qty", ColumnType::Integer),
        ])
        .await?;
        rows.insert(&table, &object(json!({"code": "77", "qty": 1}))).await?;
        rows.insert(&table, &object(json!({"code": "abc", "qty": 2}))).await?;

        // "77" is not a rowid in this table, so the key column is tried next.
        let affected = rows.update(&table, "77", &object(json!({"qty": 5}))).await?;
        assert_eq!(affected, 1);
        assert_eq!(rows.get(&table, "77").await?.get("qty"), Some(&Value::Integer(5)));

        assert_eq!(rows.delete(&table, "abc").await?, 1);
        assert_eq!(rows.delete(&table, "abc").await?, 0);
        assert_eq!(rows.count(&table).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_rejects_unknown_columns_and_empty_updates() -> TabulaResult<()> {
        let (rows, table) = setup(vec![ColumnDescriptor::new("name", ColumnType::Text)]).await?;
        let err = rows
            .insert(&table, &object(json!({"nope": 1})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TabulaError::Validation(ValidationError::UnknownColumn { .. })
        ));
        rows.insert(&table, &object(json!({"name": "x"}))).await?;
        assert!(rows.update(&table, "1", &Map::new()).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_filters_and_pages() -> TabulaResult<()> {
        let (rows, table) = setup(vec![
            ColumnDescriptor::new("id", ColumnType::Integer).primary_key(),
            ColumnDescriptor::new("a", ColumnType::Integer),
            ColumnDescriptor::new("label", ColumnType::Text),
        ])
        .await?;
        for (a, label) in [(1, "Alpha"), (2, "beta"), (3, "Gamma")] {
            rows.insert(&table, &object(json!({"a": a, "label": label}))).await?;
        }

        let listing = rows
            .list(&table, &RowQuery::from_params([("a__gt", "1"), ("sort", "a")]))
            .await?;
        let values: Vec<_> = listing.page.rows.iter().filter_map(|r| r.get("a").cloned()).collect();
        assert_eq!(values, vec![Value::Integer(2), Value::Integer(3)]);
        assert_eq!(listing.page.total, 2);

        let listing = rows
            .list(&table, &RowQuery::from_params([("search", "ALP"), ("bogus__gt", "1")]))
            .await?;
        assert_eq!(listing.page.total, 1);
        assert_eq!(listing.ignored_filters, vec!["bogus__gt".to_string()]);

        let listing = rows
            .list(&table, &RowQuery::from_params([("limit", "2"), ("page", "2"), ("sort", "id")]))
            .await?;
        assert_eq!(listing.page.rows.len(), 1);
        assert_eq!(listing.page.total_pages, 2);
        Ok(())
    }
}
