//! SQLite backend.
//!
//! One connection behind a mutex. Every call runs on the blocking pool so
//! the async runtime never waits on file I/O.

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::sync::{Arc, Mutex};
use tabula_core::value::TIMESTAMP_FORMAT;
use tabula_core::{Dialect, DialectKind, StorageError, TabulaResult, Value};
use tracing::debug;

use super::{ResultSet, SqlBackend, Statement};
use crate::config::SqliteConfig;

#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").finish_non_exhaustive()
    }
}

impl SqliteBackend {
    pub fn open(config: &SqliteConfig) -> TabulaResult<Self> {
        let conn = if config.is_in_memory() {
            Connection::open_in_memory()
        } else {
            Connection::open(&config.path)
        }
        .map_err(map_error)?;

        conn.busy_timeout(config.busy_timeout).map_err(map_error)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(map_error)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> TabulaResult<Self> {
        Self::open(&SqliteConfig::in_memory())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> TabulaResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> TabulaResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StorageError::LockPoisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::TaskFailed {
            reason: e.to_string(),
        })?
    }
}

#[async_trait]
impl SqlBackend for SqliteBackend {
    fn dialect(&self) -> &'static dyn Dialect {
        DialectKind::Sqlite.dialect()
    }

    async fn execute(&self, statement: &Statement) -> TabulaResult<u64> {
        debug!(sql = %statement.sql, params = statement.params.len(), "sqlite execute");
        let statement = statement.clone();
        self.with_conn(move |conn| execute_one(conn, &statement)).await
    }

    async fn query(&self, statement: &Statement) -> TabulaResult<ResultSet> {
        debug!(sql = %statement.sql, params = statement.params.len(), "sqlite query");
        let statement = statement.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&statement.sql).map_err(map_error)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let width = columns.len();

            let mut rows = stmt
                .query(params_from_iter(statement.params.iter().map(to_sql_value)))
                .map_err(map_error)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(map_error)? {
                let mut values = Vec::with_capacity(width);
                for index in 0..width {
                    values.push(from_value_ref(row.get_ref(index).map_err(map_error)?));
                }
                out.push(values);
            }
            Ok(ResultSet { columns, rows: out })
        })
        .await
    }

    async fn insert(&self, statement: &Statement, returns_id: bool) -> TabulaResult<Option<Value>> {
        debug!(sql = %statement.sql, returns_id, "sqlite insert");
        let statement = statement.clone();
        self.with_conn(move |conn| {
            if returns_id {
                let mut stmt = conn.prepare(&statement.sql).map_err(map_error)?;
                let mut rows = stmt
                    .query(params_from_iter(statement.params.iter().map(to_sql_value)))
                    .map_err(map_error)?;
                return match rows.next().map_err(map_error)? {
                    Some(row) => Ok(Some(from_value_ref(row.get_ref(0).map_err(map_error)?))),
                    None => Ok(None),
                };
            }
            execute_one(conn, &statement)?;
            Ok(Some(Value::Integer(conn.last_insert_rowid())))
        })
        .await
    }

    async fn execute_script(&self, statements: &[Statement]) -> TabulaResult<()> {
        let statements = statements.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(map_error)?;
            for statement in &statements {
                debug!(sql = %statement.sql, "sqlite script step");
                tx.execute(
                    &statement.sql,
                    params_from_iter(statement.params.iter().map(to_sql_value)),
                )
                .map_err(map_error)?;
            }
            tx.commit().map_err(map_error)
        })
        .await
    }

    async fn database_size(&self) -> TabulaResult<Option<u64>> {
        self.with_conn(|conn| {
            let pages: i64 = conn
                .query_row("PRAGMA page_count", [], |row| row.get(0))
                .map_err(map_error)?;
            let page_size: i64 = conn
                .query_row("PRAGMA page_size", [], |row| row.get(0))
                .map_err(map_error)?;
            Ok(u64::try_from(pages.saturating_mul(page_size)).ok())
        })
        .await
    }

    async fn ping(&self) -> TabulaResult<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(map_error)
        })
        .await
    }
}

fn execute_one(conn: &Connection, statement: &Statement) -> TabulaResult<u64> {
    let affected = conn
        .execute(
            &statement.sql,
            params_from_iter(statement.params.iter().map(to_sql_value)),
        )
        .map_err(map_error)?;
    Ok(affected as u64)
}

// ============================================================================
// VALUE MAPPING
// ============================================================================

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(f) => SqlValue::Real(*f),
        Value::Blob(bytes) => SqlValue::Blob(bytes.clone()),
        Value::Timestamp(ts) => SqlValue::Text(ts.format(TIMESTAMP_FORMAT).to_string()),
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

/// Missing tables or columns mean the schema moved under the statement.
fn map_error(err: rusqlite::Error) -> tabula_core::TabulaError {
    let message = err.to_string();
    if message.contains("no such column") || message.contains("no such table") {
        StorageError::SchemaConflict { message }.into()
    } else {
        StorageError::Execution { message }.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_values() -> TabulaResult<()> {
        let backend = SqliteBackend::in_memory()?;
        backend
            .execute(&Statement::new("CREATE TABLE t (a INTEGER, b TEXT, c BLOB, d DATETIME)"))
            .await?;

        let ts = tabula_core::value::parse_timestamp("2024-05-06 07:08:09").expect("timestamp");
        let id = backend
            .insert(
                &Statement::with_params(
                    "INSERT INTO t (a, b, c, d) VALUES (?1, ?2, ?3, ?4)",
                    vec![
                        Value::Boolean(true),
                        Value::Text("x".to_string()),
                        Value::Blob(vec![1, 2]),
                        Value::Timestamp(ts),
                    ],
                ),
                false,
            )
            .await?;
        assert_eq!(id, Some(Value::Integer(1)));

        let result = backend.query(&Statement::new("SELECT a, b, c, d FROM t")).await?;
        assert_eq!(result.columns, vec!["a", "b", "c", "d"]);
        assert_eq!(result.rows[0][0], Value::Integer(1));
        assert_eq!(result.rows[0][2], Value::Blob(vec![1, 2]));
        assert_eq!(result.rows[0][3], Value::Text("2024-05-06 07:08:09".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_column_is_schema_conflict() -> TabulaResult<()> {
        let backend = SqliteBackend::in_memory()?;
        backend.execute(&Statement::new("CREATE TABLE t (a INTEGER)")).await?;
        let err = backend
            .query(&Statement::new("SELECT nope FROM t"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            tabula_core::TabulaError::Storage(StorageError::SchemaConflict { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_script_rolls_back_on_failure() -> TabulaResult<()> {
        let backend = SqliteBackend::in_memory()?;
        backend.execute(&Statement::new("CREATE TABLE t (a INTEGER)")).await?;
        let result = backend
            .execute_script(&[
                Statement::new("INSERT INTO t (a) VALUES (1)"),
                Statement::new("INSERT INTO missing (a) VALUES (1)"),
            ])
            .await;
        assert!(result.is_err());

        let count = backend.query(&Statement::new("SELECT COUNT(*) FROM t")).await?;
        assert_eq!(count.scalar_u64()?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_ping_and_size() -> TabulaResult<()> {
        let backend = SqliteBackend::in_memory()?;
        backend.ping().await?;
        assert!(backend.database_size().await?.is_some());
        Ok(())
    }
}
