//! Integration tests for `TableService` on SQLite.

use serde_json::json;
use std::sync::Arc;
use tabula_core::{
    ActionKind, AuthError, ColumnDescriptor, ColumnType, OwnerId, RowQuery, Source,
    StaticOwnerDirectory, Value,
};
use tabula_storage::{ActivityQuery, SqliteConfig, StorageConfig, TableService, TransferFormat};
use tabula_test_utils::assertions::{assert_auth_error, assert_not_found, assert_validation_error};
use tabula_test_utils::fixtures::{
    api_ctx, dashboard_ctx, object, product_columns, sqlite_service, sqlite_service_recording,
    sqlite_service_with, OWNER,
};
use tabula_test_utils::{FailingActivitySink, TabulaResult};

#[tokio::test]
async fn test_each_mutation_records_one_activity() -> TabulaResult<()> {
    let (service, sink) = sqlite_service_recording().await?;
    let ctx = dashboard_ctx(OWNER);

    service.create_table(&ctx, "products", product_columns()).await?;
    service
        .add_column(&ctx, "products", ColumnDescriptor::new("sku", ColumnType::Text))
        .await?;
    service.rename_column(&ctx, "products", "sku", "code").await?;
    service.insert_row(&ctx, "products", &object(json!({"name": "lamp"}))).await?;
    service
        .update_row(&ctx, "products", "1", &object(json!({"price": 9.5})))
        .await?;
    service.export(&ctx, "products", TransferFormat::Csv).await?;
    service
        .import(&ctx, "products", TransferFormat::Json, &[json!({"name": "desk"})])
        .await?;
    service.delete_row(&ctx, "products", "1").await?;
    service.drop_column(&ctx, "products", "code").await?;
    service.drop_table(&ctx, "products").await?;

    assert_eq!(
        sink.actions(),
        vec![
            ActionKind::CreateTable,
            ActionKind::AddColumn,
            ActionKind::RenameColumn,
            ActionKind::InsertRow,
            ActionKind::UpdateRow,
            ActionKind::ExportData,
            ActionKind::ImportData,
            ActionKind::DeleteRow,
            ActionKind::DeleteColumn,
            ActionKind::DeleteTable,
        ]
    );
    let records = sink.records();
    assert_eq!(records[0].description, "Created table \"products\" with 6 columns");
    assert_eq!(records[5].description, "Exported 1 rows from \"products\" as CSV");
    assert!(records.iter().all(|r| r.source == Source::Dashboard));
    Ok(())
}

#[tokio::test]
async fn test_failed_operations_record_nothing() -> TabulaResult<()> {
    let (service, sink) = sqlite_service_recording().await?;
    let ctx = dashboard_ctx(OWNER);
    service.create_table(&ctx, "t", product_columns()).await?;
    let before = sink.records().len();

    assert_validation_error(&service.create_table(&ctx, "t", product_columns()).await);
    assert_not_found(&service.drop_table(&ctx, "missing").await);
    assert_eq!(service.update_row(&ctx, "t", "42", &object(json!({"price": 1}))).await?, 0);
    assert_eq!(service.delete_row(&ctx, "t", "42").await?, 0);
    assert_validation_error(&service.insert_row(&ctx, "t", &object(json!({"nope": 1}))).await);

    assert_eq!(sink.records().len(), before);
    Ok(())
}

#[tokio::test]
async fn test_api_principal_descriptions() -> TabulaResult<()> {
    let (service, sink) = sqlite_service_recording().await?;
    let ctx = api_ctx(OWNER, "ci");
    service.create_table(&ctx, "notes", product_columns()).await?;
    service.insert_row(&ctx, "notes", &object(json!({"name": "a"}))).await?;
    service.delete_row(&ctx, "notes", "1").await?;

    let records = sink.records();
    assert_eq!(records[0].description, "Created table \"notes\" with 6 columns via API");
    assert_eq!(records[1].description, "Inserted row via API into \"notes\"");
    assert_eq!(records[2].description, "Deleted row 1 via API from \"notes\"");
    assert!(records.iter().all(|r| r.source == Source::Api));
    Ok(())
}

#[tokio::test]
async fn test_activity_sink_failure_does_not_fail_mutation() -> TabulaResult<()> {
    let service = sqlite_service()
        .await?
        .with_activity_sink(Arc::new(FailingActivitySink));
    let ctx = dashboard_ctx(OWNER);
    service.create_table(&ctx, "t", product_columns()).await?;
    assert!(service.insert_row(&ctx, "t", &object(json!({"name": "x"}))).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_activity_log_filters_and_paging() -> TabulaResult<()> {
    let service = sqlite_service().await?;
    let ctx = dashboard_ctx(OWNER);
    service.create_table(&ctx, "orders", product_columns()).await?;
    service.create_table(&ctx, "order_lines", product_columns()).await?;
    service.create_table(&ctx, "users", product_columns()).await?;
    service.insert_row(&ctx, "orders", &object(json!({"name": "n"}))).await?;

    let all = service.list_activity(OWNER, &ActivityQuery::default()).await?;
    assert_eq!(all.total, 4);
    assert_eq!(all.entries[0].record.action, ActionKind::InsertRow);

    let creates = service
        .list_activity(
            OWNER,
            &ActivityQuery {
                action: Some(ActionKind::CreateTable),
                ..ActivityQuery::default()
            },
        )
        .await?;
    assert_eq!(creates.total, 3);

    let orders = service
        .list_activity(
            OWNER,
            &ActivityQuery {
                table: Some("ORDER".to_string()),
                ..ActivityQuery::default()
            },
        )
        .await?;
    assert_eq!(orders.total, 3);

    let paged = service.list_activity(OWNER, &ActivityQuery::new(2, 3)).await?;
    assert_eq!(paged.entries.len(), 1);
    assert_eq!(paged.total_pages, 2);

    let other = service.list_activity(OwnerId(2), &ActivityQuery::default()).await?;
    assert_eq!(other.total, 0);
    Ok(())
}

#[tokio::test]
async fn test_stats_counts_tables_rows_and_actions() -> TabulaResult<()> {
    let service = sqlite_service().await?;
    let ctx = dashboard_ctx(OWNER);
    service.create_table(&ctx, "a", product_columns()).await?;
    service.create_table(&ctx, "b", product_columns()).await?;
    for name in ["x", "y", "z"] {
        service.insert_row(&ctx, "a", &object(json!({"name": name}))).await?;
    }

    let stats = service.stats(OWNER).await?;
    assert_eq!(stats.total_tables, 2);
    assert_eq!(stats.total_rows, 3);
    assert_eq!(stats.actions_today, 5);

    let empty = service.stats(OwnerId(9)).await?;
    assert_eq!((empty.total_tables, empty.total_rows, empty.actions_today), (0, 0, 0));
    Ok(())
}

#[tokio::test]
async fn test_owners_are_isolated() -> TabulaResult<()> {
    let service = sqlite_service().await?;
    service.create_table(&dashboard_ctx(OWNER), "shared", product_columns()).await?;
    service
        .create_table(&dashboard_ctx(OwnerId(2)), "shared", product_columns())
        .await?;
    service
        .insert_row(&dashboard_ctx(OWNER), "shared", &object(json!({"name": "mine"})))
        .await?;

    let theirs = service.describe_table(OwnerId(2), "shared").await?;
    assert_eq!(theirs.row_count, 0);
    assert_not_found(&service.table(OwnerId(3), "shared").await);
    assert_eq!(service.list_tables(OwnerId(2)).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_search_sort_and_defaults() -> TabulaResult<()> {
    let service = sqlite_service().await?;
    let ctx = dashboard_ctx(OWNER);
    service.create_table(&ctx, "p", product_columns()).await?;
    for (name, price) in [("Red Lamp", 30.0), ("blue lamp", 10.0), ("Chair", 20.0)] {
        service
            .insert_row(&ctx, "p", &object(json!({"name": name, "price": price})))
            .await?;
    }

    let listing = service
        .list_rows(
            OWNER,
            "p",
            &RowQuery::from_params([("search", "LAMP"), ("sort", "price"), ("order", "desc")]),
        )
        .await?;
    let names: Vec<_> = listing
        .page
        .rows
        .iter()
        .filter_map(|r| r.get("name").and_then(Value::as_str).map(str::to_string))
        .collect();
    assert_eq!(names, vec!["Red Lamp", "blue lamp"]);
    assert_eq!(listing.page.limit, 25);
    assert_eq!(listing.page.page, 1);

    let default_flag = service.get_row(OWNER, "p", "3").await?;
    assert_eq!(default_flag.get("in_stock"), Some(&Value::Boolean(true)));
    Ok(())
}

#[tokio::test]
async fn test_search_matches_wildcards_literally() -> TabulaResult<()> {
    let service = sqlite_service().await?;
    let ctx = dashboard_ctx(OWNER);
    service.create_table(&ctx, "p", product_columns()).await?;
    for name in ["a_b", "axb", "50% off"] {
        service.insert_row(&ctx, "p", &object(json!({"name": name}))).await?;
    }

    for (search, expected) in [("a_b", "a_b"), ("50%", "50% off")] {
        let listing = service
            .list_rows(OWNER, "p", &RowQuery::from_params([("search", search)]))
            .await?;
        assert_eq!(listing.page.total, 1, "search {:?}", search);
        assert_eq!(
            listing.page.rows[0].get("name").and_then(Value::as_str),
            Some(expected)
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_unidentifiable_row_id_is_not_found() -> TabulaResult<()> {
    let service = sqlite_service().await?;
    let ctx = dashboard_ctx(OWNER);
    service
        .create_table(&ctx, "log", vec![ColumnDescriptor::new("line", ColumnType::Text)])
        .await?;
    service.insert_row(&ctx, "log", &object(json!({"line": "boot"}))).await?;

    assert_not_found(&service.get_row(OWNER, "log", "abc").await);
    assert_eq!(service.delete_row(&ctx, "log", "abc").await?, 0);
    assert_eq!(
        service.update_row(&ctx, "log", "abc", &object(json!({"line": "x"}))).await?,
        0
    );
    assert_eq!(service.delete_row(&ctx, "log", "1").await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_absurd_page_is_empty() -> TabulaResult<()> {
    let service = sqlite_service().await?;
    let ctx = dashboard_ctx(OWNER);
    service.create_table(&ctx, "p", product_columns()).await?;
    service.insert_row(&ctx, "p", &object(json!({"name": "lamp"}))).await?;

    let listing = service
        .list_rows(
            OWNER,
            "p",
            &RowQuery::from_params([("page", "100000000000000000"), ("limit", "100")]),
        )
        .await?;
    assert!(listing.page.rows.is_empty());
    assert_eq!(listing.page.total, 1);
    Ok(())
}

#[tokio::test]
async fn test_table_names_are_unique_ignoring_case() -> TabulaResult<()> {
    let service = sqlite_service().await?;
    let ctx = dashboard_ctx(OWNER);
    service.create_table(&ctx, "items", product_columns()).await?;
    assert_validation_error(&service.create_table(&ctx, "Items", product_columns()).await);
    assert_eq!(service.list_tables(OWNER).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_import_reports_bad_rows() -> TabulaResult<()> {
    let service = sqlite_service().await?;
    let ctx = dashboard_ctx(OWNER);
    service.create_table(&ctx, "p", product_columns()).await?;

    let mut data = vec![json!({"name": "ok"}), json!("not an object"), json!({"price": "cheap"})];
    data.extend((0..12).map(|_| json!([1, 2])));
    let report = service.import(&ctx, "p", TransferFormat::Json, &data).await?;
    assert_eq!(report.imported, 1);
    assert_eq!(report.total_errors, 14);
    assert_eq!(report.errors.len(), 10);
    assert_eq!(report.errors[0], "Row 2: Not a valid object");
    assert!(report.errors[1].starts_with("Row 3: "));

    assert_validation_error(&service.import(&ctx, "p", TransferFormat::Json, &[]).await);
    Ok(())
}

// ============================================================================
// API KEYS
// ============================================================================

#[tokio::test]
async fn test_api_key_lifecycle() -> TabulaResult<()> {
    let service = sqlite_service().await?;
    let keys = service.api_keys();

    let issued = keys.create(OWNER, "deploy").await?;
    assert!(issued.raw_key.starts_with("sk_"));
    assert_eq!(issued.record.key_prefix, issued.raw_key[..10]);

    let principal = keys.authenticate(&issued.raw_key).await?;
    assert_eq!(principal.owner, OWNER);
    assert_eq!(principal.api_key_name.as_deref(), Some("deploy"));

    let listed = keys.list(OWNER).await?;
    assert_eq!(listed.len(), 1);
    assert!(listed[0].last_used_at.is_some());

    keys.set_active(OWNER, issued.record.id, false).await?;
    assert_auth_error(&keys.authenticate(&issued.raw_key).await, AuthError::InvalidCredential);
    keys.set_active(OWNER, issued.record.id, true).await?;
    keys.authenticate(&issued.raw_key).await?;

    assert_not_found(&keys.delete(OwnerId(2), issued.record.id).await);
    keys.delete(OWNER, issued.record.id).await?;
    assert_auth_error(&keys.authenticate(&issued.raw_key).await, AuthError::InvalidCredential);
    assert_auth_error(&keys.authenticate("sk_short").await, AuthError::InvalidCredential);
    Ok(())
}

#[tokio::test]
async fn test_api_key_of_disabled_owner() -> TabulaResult<()> {
    let service = sqlite_service_with(StaticOwnerDirectory::new([OwnerId(7)])).await?;
    let issued = service.api_keys().create(OwnerId(7), "old").await?;
    assert_auth_error(
        &service.api_keys().authenticate(&issued.raw_key).await,
        AuthError::OwnerDisabled,
    );
    Ok(())
}

// ============================================================================
// FILE-BACKED DATABASE
// ============================================================================

#[tokio::test]
async fn test_schema_survives_reopen() -> TabulaResult<()> {
    let dir = tempfile::tempdir().map_err(|e| tabula_core::StorageError::Connection {
        reason: e.to_string(),
    })?;
    let config = StorageConfig::Sqlite(SqliteConfig {
        path: dir.path().join("tabula.db"),
        ..SqliteConfig::default()
    });
    let owners = Arc::new(StaticOwnerDirectory::default());

    {
        let service = TableService::open(&config, owners.clone()).await?;
        let ctx = dashboard_ctx(OWNER);
        service.create_table(&ctx, "kept", product_columns()).await?;
        service.insert_row(&ctx, "kept", &object(json!({"name": "persisted"}))).await?;
        service.drop_column(&ctx, "kept", "thumb").await?;
    }

    let reopened = TableService::open(&config, owners).await?;
    let schema = reopened.describe_table(OWNER, "kept").await?;
    assert_eq!(schema.row_count, 1);
    assert_eq!(schema.columns.len(), 5);
    let row = reopened.get_row(OWNER, "kept", "1").await?;
    assert_eq!(row.get("name"), Some(&Value::Text("persisted".to_string())));
    assert!(reopened.stats(OWNER).await?.database_size > 0);
    Ok(())
}
