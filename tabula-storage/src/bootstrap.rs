//! Metadata tables used by the service itself.
//!
//! Created on startup with `IF NOT EXISTS`, through the same dialect adapter
//! that builds user tables.

use serde_json::json;
use tabula_core::ddl::{create_index, create_table_if_not_exists};
use tabula_core::{ColumnDescriptor, ColumnType, Dialect, Statement, TabulaResult};
use tracing::info;

use crate::backend::SqlBackend;

pub const TABLES_TABLE: &str = "tabula_tables";
pub const ACTIVITY_TABLE: &str = "tabula_activity_log";
pub const API_KEYS_TABLE: &str = "tabula_api_keys";

fn id() -> ColumnDescriptor {
    ColumnDescriptor::new("id", ColumnType::Integer).primary_key()
}

fn owner_id() -> ColumnDescriptor {
    ColumnDescriptor::new("owner_id", ColumnType::Integer).not_null()
}

pub fn tables_columns() -> Vec<ColumnDescriptor> {
    vec![
        id(),
        owner_id(),
        ColumnDescriptor::new("table_name", ColumnType::Text).not_null(),
        ColumnDescriptor::new("physical_name", ColumnType::Text)
            .not_null()
            .unique(),
        ColumnDescriptor::new("schema_json", ColumnType::Text).not_null(),
        ColumnDescriptor::new("created_at", ColumnType::Datetime).not_null(),
    ]
}

pub fn activity_columns() -> Vec<ColumnDescriptor> {
    vec![
        id(),
        owner_id(),
        ColumnDescriptor::new("action", ColumnType::Text).not_null(),
        ColumnDescriptor::new("table_name", ColumnType::Text),
        ColumnDescriptor::new("description", ColumnType::Text).not_null(),
        ColumnDescriptor::new("metadata", ColumnType::Text),
        ColumnDescriptor::new("ip_address", ColumnType::Text),
        ColumnDescriptor::new("source", ColumnType::Text)
            .not_null()
            .with_default(json!("dashboard")),
        ColumnDescriptor::new("created_at", ColumnType::Datetime).not_null(),
    ]
}

pub fn api_keys_columns() -> Vec<ColumnDescriptor> {
    vec![
        id(),
        owner_id(),
        ColumnDescriptor::new("name", ColumnType::Text).not_null(),
        ColumnDescriptor::new("key_prefix", ColumnType::Text).not_null(),
        ColumnDescriptor::new("key_hash", ColumnType::Text)
            .not_null()
            .unique(),
        ColumnDescriptor::new("created_at", ColumnType::Datetime).not_null(),
        ColumnDescriptor::new("last_used_at", ColumnType::Datetime),
        ColumnDescriptor::new("is_active", ColumnType::Boolean)
            .not_null()
            .with_default(json!(true)),
    ]
}

/// Every statement needed to bring an empty database up to date.
pub fn metadata_statements(dialect: &dyn Dialect) -> TabulaResult<Vec<Statement>> {
    let sql = vec![
        create_table_if_not_exists(dialect, TABLES_TABLE, &tables_columns())?,
        create_index(
            dialect,
            "tabula_tables_owner_name",
            TABLES_TABLE,
            &["owner_id", "table_name"],
            true,
        )?,
        create_table_if_not_exists(dialect, ACTIVITY_TABLE, &activity_columns())?,
        create_index(
            dialect,
            "tabula_activity_owner_created",
            ACTIVITY_TABLE,
            &["owner_id", "created_at"],
            false,
        )?,
        create_table_if_not_exists(dialect, API_KEYS_TABLE, &api_keys_columns())?,
        create_index(
            dialect,
            "tabula_api_keys_owner",
            API_KEYS_TABLE,
            &["owner_id"],
            false,
        )?,
    ];
    Ok(sql.into_iter().map(Statement::new).collect())
}

/// Create the metadata tables if they are missing.
pub async fn bootstrap(backend: &dyn SqlBackend) -> TabulaResult<()> {
    let statements = metadata_statements(backend.dialect())?;
    backend.execute_script(&statements).await?;
    info!(dialect = backend.dialect().name(), "metadata tables ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqliteBackend;

    #[test]
    fn test_postgres_metadata_ddl() -> TabulaResult<()> {
        let statements = metadata_statements(tabula_core::DialectKind::Postgres.dialect())?;
        assert!(statements[0].sql.starts_with("CREATE TABLE IF NOT EXISTS \"tabula_tables\" (\"id\" BIGSERIAL PRIMARY KEY"));
        assert!(statements[4].sql.contains("\"is_active\" BOOLEAN NOT NULL DEFAULT TRUE"));
        Ok(())
    }

    #[tokio::test]
    async fn test_bootstrap_is_repeatable() -> TabulaResult<()> {
        let backend = SqliteBackend::in_memory()?;
        bootstrap(&backend).await?;
        bootstrap(&backend).await?;
        Ok(())
    }
}
