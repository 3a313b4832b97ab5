//! PostgreSQL integration tests.
//!
//! Run with `--features db-tests` against a scratch database configured
//! through the `TABULA_DB_*` variables. Each test uses its own owner id so
//! reruns and parallel tests do not collide.

#![cfg(feature = "db-tests")]

use serde_json::json;
use std::sync::Arc;
use tabula_core::{ColumnDescriptor, ColumnType, OwnerId, RowQuery, StaticOwnerDirectory, Value};
use tabula_storage::{DbConfig, StorageConfig, TableService};
use tabula_test_utils::fixtures::{dashboard_ctx, object, product_columns};
use tabula_test_utils::TabulaResult;

async fn service() -> TabulaResult<TableService> {
    let config = DbConfig::from_env()?;
    TableService::open(
        &StorageConfig::Postgres(config),
        Arc::new(StaticOwnerDirectory::default()),
    )
    .await
}

fn unique_owner() -> OwnerId {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    OwnerId(nanos.rem_euclid(1_000_000_000))
}

#[tokio::test]
async fn test_postgres_table_lifecycle() -> TabulaResult<()> {
    let service = service().await?;
    let owner = unique_owner();
    let ctx = dashboard_ctx(owner);

    service.create_table(&ctx, "products", product_columns()).await?;
    let id = service
        .insert_row(&ctx, "products", &object(json!({"name": "Lamp", "price": 12.5})))
        .await?;
    assert_eq!(id, Some(Value::Integer(1)));

    let listing = service
        .list_rows(owner, "products", &RowQuery::from_params([("search", "lAmP")]))
        .await?;
    assert_eq!(listing.page.total, 1);

    service.rename_column(&ctx, "products", "price", "cost").await?;
    service.drop_column(&ctx, "products", "thumb").await?;
    let row = service.get_row(owner, "products", "1").await?;
    assert_eq!(row.get("cost"), Some(&Value::Real(12.5)));
    assert!(row.get("thumb").is_none());

    service.drop_table(&ctx, "products").await?;
    assert!(service.table(owner, "products").await.unwrap_err().is_not_found());
    Ok(())
}

#[tokio::test]
async fn test_postgres_text_primary_key() -> TabulaResult<()> {
    let service = service().await?;
    let owner = unique_owner();
    let ctx = dashboard_ctx(owner);

    service
        .create_table(&ctx, "codes", vec![
            ColumnDescriptor::new("code", ColumnType::Text).primary_key(),
            ColumnDescriptor::new("uses", ColumnType::Integer),
        ])
        .await?;
    service
        .insert_row(&ctx, "codes", &object(json!({"code": "123", "uses": 1})))
        .await?;

    assert_eq!(
        service.update_row(&ctx, "codes", "123", &object(json!({"uses": 2}))).await?,
        1
    );
    let row = service.get_row(owner, "codes", "123").await?;
    assert_eq!(row.get("uses"), Some(&Value::Integer(2)));

    service.drop_table(&ctx, "codes").await?;
    Ok(())
}
