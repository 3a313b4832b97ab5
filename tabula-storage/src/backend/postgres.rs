//! PostgreSQL backend on a deadpool connection pool.
//!
//! Parameters are bound through [`PgValue`], which adapts a [`Value`] to
//! whatever type the server inferred for its placeholder. That lets one
//! statement builder serve both engines without type annotations in SQL.

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use deadpool_postgres::Pool;
use postgres_types::{to_sql_checked, IsNull, ToSql, Type};
use std::error::Error;
use tabula_core::value::{parse_timestamp, TIMESTAMP_FORMAT};
use tabula_core::{Dialect, DialectKind, StorageError, TabulaError, TabulaResult, Value};
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;
use tracing::debug;

use super::{ResultSet, SqlBackend, Statement};
use crate::config::DbConfig;

#[derive(Clone)]
pub struct PostgresBackend {
    pool: Pool,
}

impl std::fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackend")
            .field("pool_size", &self.pool.status().size)
            .finish()
    }
}

impl PostgresBackend {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> TabulaResult<Self> {
        config.create_pool().map(Self::new)
    }

    async fn get_conn(&self) -> TabulaResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            StorageError::Connection {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

fn bind(params: &[Value]) -> Vec<PgValue<'_>> {
    params.iter().map(PgValue).collect()
}

fn as_refs<'a>(values: &'a [PgValue<'a>]) -> Vec<&'a (dyn ToSql + Sync)> {
    values.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl SqlBackend for PostgresBackend {
    fn dialect(&self) -> &'static dyn Dialect {
        DialectKind::Postgres.dialect()
    }

    async fn execute(&self, statement: &Statement) -> TabulaResult<u64> {
        debug!(sql = %statement.sql, params = statement.params.len(), "postgres execute");
        let conn = self.get_conn().await?;
        let values = bind(&statement.params);
        conn.execute(statement.sql.as_str(), &as_refs(&values))
            .await
            .map_err(map_error)
    }

    async fn query(&self, statement: &Statement) -> TabulaResult<ResultSet> {
        debug!(sql = %statement.sql, params = statement.params.len(), "postgres query");
        let conn = self.get_conn().await?;
        let prepared = conn.prepare(&statement.sql).await.map_err(map_error)?;
        let columns = prepared
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let values = bind(&statement.params);
        let rows = conn
            .query(&prepared, &as_refs(&values))
            .await
            .map_err(map_error)?;
        let rows = rows.iter().map(decode_row).collect::<TabulaResult<Vec<_>>>()?;
        Ok(ResultSet { columns, rows })
    }

    async fn insert(&self, statement: &Statement, returns_id: bool) -> TabulaResult<Option<Value>> {
        debug!(sql = %statement.sql, returns_id, "postgres insert");
        let conn = self.get_conn().await?;
        let values = bind(&statement.params);
        if returns_id {
            let row = conn
                .query_opt(statement.sql.as_str(), &as_refs(&values))
                .await
                .map_err(map_error)?;
            return match row {
                Some(row) => Ok(decode_row(&row)?.into_iter().next()),
                None => Ok(None),
            };
        }
        // No RETURNING column and no implicit row id to fall back on.
        conn.execute(statement.sql.as_str(), &as_refs(&values))
            .await
            .map_err(map_error)?;
        Ok(None)
    }

    async fn execute_script(&self, statements: &[Statement]) -> TabulaResult<()> {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await.map_err(map_error)?;
        for statement in statements {
            debug!(sql = %statement.sql, "postgres script step");
            let values = bind(&statement.params);
            tx.execute(statement.sql.as_str(), &as_refs(&values))
                .await
                .map_err(map_error)?;
        }
        tx.commit().await.map_err(map_error)
    }

    async fn database_size(&self) -> TabulaResult<Option<u64>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_one("SELECT pg_database_size(current_database())", &[])
            .await
            .map_err(map_error)?;
        let size: i64 = row.try_get(0).map_err(map_error)?;
        Ok(u64::try_from(size).ok())
    }

    async fn ping(&self) -> TabulaResult<()> {
        let conn = self.get_conn().await?;
        conn.simple_query("SELECT 1").await.map_err(map_error)?;
        Ok(())
    }
}

// ============================================================================
// PARAMETER BINDING
// ============================================================================

/// A [`Value`] bound to a placeholder of whatever type the server expects.
#[derive(Debug)]
pub struct PgValue<'a>(pub &'a Value);

type BoxError = Box<dyn Error + Sync + Send>;

fn mismatch(value: &Value, ty: &Type) -> BoxError {
    format!("cannot bind {:?} to a parameter of type {}", value, ty).into()
}

fn is_text(ty: &Type) -> bool {
    [Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME, Type::UNKNOWN].contains(ty)
}

impl ToSql for PgValue<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Integer(i) => bind_integer(*i, self.0, ty, out),
            Value::Boolean(b) => {
                if *ty == Type::BOOL {
                    b.to_sql(ty, out)
                } else if is_text(ty) {
                    b.to_string().to_sql(ty, out)
                } else {
                    bind_integer(i64::from(*b), self.0, ty, out)
                }
            }
            Value::Real(f) => {
                if *ty == Type::FLOAT8 {
                    f.to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*f as f32).to_sql(ty, out)
                } else if is_text(ty) {
                    f.to_string().to_sql(ty, out)
                } else {
                    Err(mismatch(self.0, ty))
                }
            }
            Value::Text(s) => bind_text(s, self.0, ty, out),
            Value::Blob(bytes) => {
                if *ty == Type::BYTEA {
                    bytes.as_slice().to_sql(ty, out)
                } else {
                    Err(mismatch(self.0, ty))
                }
            }
            Value::Timestamp(ts) => bind_timestamp(ts, self.0, ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn bind_integer(i: i64, value: &Value, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if *ty == Type::INT8 {
        i.to_sql(ty, out)
    } else if *ty == Type::INT4 {
        i32::try_from(i)?.to_sql(ty, out)
    } else if *ty == Type::INT2 {
        i16::try_from(i)?.to_sql(ty, out)
    } else if *ty == Type::FLOAT8 {
        (i as f64).to_sql(ty, out)
    } else if *ty == Type::FLOAT4 {
        (i as f32).to_sql(ty, out)
    } else if *ty == Type::BOOL {
        (i != 0).to_sql(ty, out)
    } else if is_text(ty) {
        i.to_string().to_sql(ty, out)
    } else {
        Err(mismatch(value, ty))
    }
}

fn bind_text(s: &str, value: &Value, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if is_text(ty) {
        s.to_sql(ty, out)
    } else if *ty == Type::INT8 || *ty == Type::INT4 || *ty == Type::INT2 {
        bind_integer(s.trim().parse::<i64>()?, value, ty, out)
    } else if *ty == Type::FLOAT8 {
        s.trim().parse::<f64>()?.to_sql(ty, out)
    } else if *ty == Type::BOOL {
        let b = Value::Text(s.to_string())
            .as_bool()
            .ok_or_else(|| mismatch(value, ty))?;
        b.to_sql(ty, out)
    } else if *ty == Type::TIMESTAMP || *ty == Type::TIMESTAMPTZ {
        let ts = parse_timestamp(s).ok_or_else(|| mismatch(value, ty))?;
        bind_timestamp(&ts, value, ty, out)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out)
    } else {
        Err(mismatch(value, ty))
    }
}

fn bind_timestamp(
    ts: &NaiveDateTime,
    value: &Value,
    ty: &Type,
    out: &mut BytesMut,
) -> Result<IsNull, BoxError> {
    if *ty == Type::TIMESTAMP {
        ts.to_sql(ty, out)
    } else if *ty == Type::TIMESTAMPTZ {
        Utc.from_utc_datetime(ts).to_sql(ty, out)
    } else if is_text(ty) {
        ts.format(TIMESTAMP_FORMAT).to_string().to_sql(ty, out)
    } else {
        Err(mismatch(value, ty))
    }
}

// ============================================================================
// RESULT DECODING
// ============================================================================

fn decode_row(row: &Row) -> TabulaResult<Vec<Value>> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(index, column)| decode_cell(row, index, column.type_()))
        .collect()
}

fn decode_cell(row: &Row, index: usize, ty: &Type) -> TabulaResult<Value> {
    fn get<'a, T: tokio_postgres::types::FromSql<'a>>(
        row: &'a Row,
        index: usize,
    ) -> TabulaResult<Option<T>> {
        row.try_get::<_, Option<T>>(index).map_err(map_error)
    }

    let value = match ty.name() {
        "bool" => get::<bool>(row, index)?.map(Value::Boolean),
        "int2" => get::<i16>(row, index)?.map(|v| Value::Integer(i64::from(v))),
        "int4" => get::<i32>(row, index)?.map(|v| Value::Integer(i64::from(v))),
        "int8" => get::<i64>(row, index)?.map(Value::Integer),
        "float4" => get::<f32>(row, index)?.map(|v| Value::Real(f64::from(v))),
        "float8" => get::<f64>(row, index)?.map(Value::Real),
        "text" | "varchar" | "bpchar" | "name" => get::<String>(row, index)?.map(Value::Text),
        "bytea" => get::<Vec<u8>>(row, index)?.map(Value::Blob),
        "timestamp" => get::<NaiveDateTime>(row, index)?.map(Value::Timestamp),
        "timestamptz" => get::<DateTime<Utc>>(row, index)?.map(|v| Value::Timestamp(v.naive_utc())),
        "json" | "jsonb" => get::<serde_json::Value>(row, index)?.map(|v| Value::Text(v.to_string())),
        other => {
            return Err(StorageError::Execution {
                message: format!("unsupported result column type '{}'", other),
            }
            .into())
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Undefined tables or columns mean the schema moved under the statement.
fn map_error(err: tokio_postgres::Error) -> TabulaError {
    let message = match err.as_db_error() {
        Some(db) => db.message().to_string(),
        None => err.to_string(),
    };
    match err.code() {
        Some(code) if *code == SqlState::UNDEFINED_COLUMN || *code == SqlState::UNDEFINED_TABLE => {
            StorageError::SchemaConflict { message }.into()
        }
        _ => StorageError::Execution { message }.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &Value, ty: &Type) -> Result<IsNull, BoxError> {
        let mut out = BytesMut::new();
        PgValue(value).to_sql(ty, &mut out)
    }

    #[test]
    fn test_null_binds_to_any_type() {
        for ty in [Type::INT8, Type::TEXT, Type::BYTEA, Type::TIMESTAMP] {
            assert!(matches!(encode(&Value::Null, &ty), Ok(IsNull::Yes)));
        }
    }

    #[test]
    fn test_integer_adapts_to_server_type() {
        assert!(encode(&Value::Integer(7), &Type::INT4).is_ok());
        assert!(encode(&Value::Integer(i64::MAX), &Type::INT4).is_err());
        assert!(encode(&Value::Integer(1), &Type::BOOL).is_ok());
        assert!(encode(&Value::Integer(1), &Type::BYTEA).is_err());
    }

    #[test]
    fn test_text_parses_for_typed_placeholders() {
        assert!(encode(&Value::Text("12".to_string()), &Type::INT8).is_ok());
        assert!(encode(&Value::Text("2024-01-01".to_string()), &Type::TIMESTAMP).is_ok());
        assert!(encode(&Value::Text("twelve".to_string()), &Type::INT8).is_err());
    }
}
