//! Property-Based Tests for the Table Service
//!
//! Every case runs against a fresh in-memory SQLite database, so the DROP
//! COLUMN cases exercise the table rebuild path.

use proptest::prelude::*;
use std::collections::HashSet;
use tabula_core::{ColumnDescriptor, ColumnType, RowQuery, Value};
use tabula_test_utils::fixtures::{dashboard_ctx, object, sqlite_service, OWNER};
use tabula_test_utils::generators::{
    arb_column_list, arb_multi_key_column_list, arb_row_for, arb_table_name,
};
use tabula_test_utils::{TabulaError, ValidationError};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Creating a table then reading it back yields the same ordered column
    /// list with the same flags.
    #[test]
    fn prop_create_then_get_preserves_columns(
        name in arb_table_name(),
        columns in arb_column_list(6),
    ) {
        runtime().block_on(async {
            let service = sqlite_service().await?;
            let ctx = dashboard_ctx(OWNER);
            service.create_table(&ctx, &name, columns.clone()).await?;

            let stored = service.table(OWNER, &name).await?;
            prop_assert_eq!(&stored.columns, &columns);
            prop_assert_eq!(stored.physical_name, format!("u{}_{}", OWNER, name));
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Two or more primary keys are rejected, and nothing is left behind.
    #[test]
    fn prop_multiple_primary_keys_rejected(
        name in arb_table_name(),
        columns in arb_multi_key_column_list(),
    ) {
        runtime().block_on(async {
            let service = sqlite_service().await?;
            let result = service.create_table(&dashboard_ctx(OWNER), &name, columns).await;
            prop_assert!(matches!(result, Err(TabulaError::Validation(_))));
            prop_assert!(service.table(OWNER, &name).await.unwrap_err().is_not_found());
            // The physical table was never created either.
            service
                .create_table(
                    &dashboard_ctx(OWNER),
                    &name,
                    vec![ColumnDescriptor::new("v", ColumnType::Text)],
                )
                .await?;
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Values inserted through the row engine read back unchanged.
    #[test]
    fn prop_insert_then_get_round_trip(
        (columns, row) in arb_column_list(6)
            .prop_flat_map(|columns| {
                let row = arb_row_for(&columns);
                (Just(columns), row)
            }),
    ) {
        runtime().block_on(async {
            let service = sqlite_service().await?;
            let ctx = dashboard_ctx(OWNER);
            let table = service.create_table(&ctx, "round_trip", columns).await?;

            let id = service.insert_row(&ctx, "round_trip", &row).await?;
            let id = id.map(|v| v.to_text()).unwrap_or_default();
            let stored = service.get_row(OWNER, "round_trip", &id).await?;

            for column in table.columns.iter().filter(|c| !c.pk) {
                let expected = Value::from_json(column.column_type, &column.name, &row[&column.name])?;
                prop_assert_eq!(stored.get(&column.name), Some(&expected), "column {}", &column.name);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Walking every page with a unique ascending sort returns each row
    /// exactly once.
    #[test]
    fn prop_pages_cover_all_rows(n in 0usize..40, limit in 1u64..12) {
        runtime().block_on(async {
            let service = sqlite_service().await?;
            let ctx = dashboard_ctx(OWNER);
            service
                .create_table(&ctx, "paged", vec![
                    ColumnDescriptor::new("id", ColumnType::Integer).primary_key(),
                    ColumnDescriptor::new("n", ColumnType::Integer),
                ])
                .await?;
            for i in 0..n {
                service.insert_row(&ctx, "paged", &object(serde_json::json!({ "n": i }))).await?;
            }

            let pages = (n as u64).div_ceil(limit);
            let mut seen = HashSet::new();
            for page in 1..=pages {
                let query = RowQuery::from_params([
                    ("page", page.to_string()),
                    ("limit", limit.to_string()),
                    ("sort", "id".to_string()),
                ]);
                let listing = service.list_rows(OWNER, "paged", &query).await?;
                prop_assert_eq!(listing.page.total, n as u64);
                prop_assert_eq!(listing.page.total_pages, pages);
                for row in &listing.page.rows {
                    prop_assert!(seen.insert(row.get("id").cloned().map(|v| v.to_text())));
                }
            }
            prop_assert_eq!(seen.len(), n);
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Comparison filters return exactly the matching rows.
    #[test]
    fn prop_comparison_filters(values in prop::collection::vec(-50i64..50, 1..20), pivot in -50i64..50) {
        runtime().block_on(async {
            let service = sqlite_service().await?;
            let ctx = dashboard_ctx(OWNER);
            service
                .create_table(&ctx, "nums", vec![ColumnDescriptor::new("a", ColumnType::Integer)])
                .await?;
            for a in &values {
                service.insert_row(&ctx, "nums", &object(serde_json::json!({ "a": a }))).await?;
            }

            for (suffix, keep) in [
                ("gt", Box::new(|a: i64| a > pivot) as Box<dyn Fn(i64) -> bool>),
                ("lte", Box::new(|a: i64| a <= pivot)),
                ("ne", Box::new(|a: i64| a != pivot)),
            ] {
                let query = RowQuery::from_params([
                    (format!("a__{}", suffix), pivot.to_string()),
                    ("limit".to_string(), "100".to_string()),
                ]);
                let listing = service.list_rows(OWNER, "nums", &query).await?;
                let mut got: Vec<i64> = listing
                    .page
                    .rows
                    .iter()
                    .filter_map(|r| r.get("a").and_then(Value::as_i64))
                    .collect();
                let mut expected: Vec<i64> = values.iter().copied().filter(|a| keep(*a)).collect();
                got.sort_unstable();
                expected.sort_unstable();
                prop_assert_eq!(got, expected, "a__{}={}", suffix, pivot);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Renaming a column moves every value to the new key.
    #[test]
    fn prop_rename_preserves_values(values in prop::collection::vec("[a-z]{0,10}", 1..10)) {
        runtime().block_on(async {
            let service = sqlite_service().await?;
            let ctx = dashboard_ctx(OWNER);
            service
                .create_table(&ctx, "words", vec![
                    ColumnDescriptor::new("id", ColumnType::Integer).primary_key(),
                    ColumnDescriptor::new("x", ColumnType::Text),
                ])
                .await?;
            for v in &values {
                service.insert_row(&ctx, "words", &object(serde_json::json!({ "x": v }))).await?;
            }

            service.rename_column(&ctx, "words", "x", "y").await?;
            for (i, v) in values.iter().enumerate() {
                let row = service.get_row(OWNER, "words", &(i + 1).to_string()).await?;
                prop_assert_eq!(row.get("y"), Some(&Value::Text(v.clone())));
                prop_assert!(row.get("x").is_none());
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Dropping a column by rebuilding keeps every other value intact.
    #[test]
    fn prop_drop_column_rebuild_preserves_rows(
        rows in prop::collection::vec((any::<i32>(), "[a-z]{0,8}", any::<bool>()), 1..15),
    ) {
        runtime().block_on(async {
            let service = sqlite_service().await?;
            let ctx = dashboard_ctx(OWNER);
            service
                .create_table(&ctx, "wide", vec![
                    ColumnDescriptor::new("id", ColumnType::Integer).primary_key(),
                    ColumnDescriptor::new("num", ColumnType::Integer),
                    ColumnDescriptor::new("label", ColumnType::Text),
                    ColumnDescriptor::new("flag", ColumnType::Boolean),
                ])
                .await?;
            for (num, label, flag) in &rows {
                service
                    .insert_row(&ctx, "wide", &object(serde_json::json!({
                        "num": num, "label": label, "flag": flag,
                    })))
                    .await?;
            }

            let table = service.drop_column(&ctx, "wide", "label").await?;
            prop_assert_eq!(table.column_names(), vec!["id", "num", "flag"]);

            for (i, (num, _, flag)) in rows.iter().enumerate() {
                let row = service.get_row(OWNER, "wide", &(i + 1).to_string()).await?;
                prop_assert_eq!(row.get("num"), Some(&Value::Integer(i64::from(*num))));
                prop_assert_eq!(row.get("flag"), Some(&Value::Boolean(*flag)));
                prop_assert!(row.get("label").is_none());
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Exporting to JSON and importing into an empty copy of the table
    /// reproduces every row.
    #[test]
    fn prop_export_import_round_trip(
        (columns, rows) in arb_column_list(5)
            .prop_flat_map(|columns| {
                let rows = prop::collection::vec(arb_row_for(&columns), 1..8);
                (Just(columns), rows)
            }),
    ) {
        runtime().block_on(async {
            let service = sqlite_service().await?;
            let ctx = dashboard_ctx(OWNER);
            service.create_table(&ctx, "source", columns.clone()).await?;
            service.create_table(&ctx, "target", columns.clone()).await?;
            for row in &rows {
                service.insert_row(&ctx, "source", row).await?;
            }

            let document = service
                .export(&ctx, "source", tabula_storage::TransferFormat::Json)
                .await?;
            let json = serde_json::to_value(&document)?;
            let data = json["rows"].as_array().cloned().unwrap_or_default();
            let report = service
                .import(&ctx, "target", tabula_storage::TransferFormat::Json, &data)
                .await?;
            prop_assert_eq!(report.imported, rows.len() as u64);
            prop_assert_eq!(report.total_errors, 0);

            let exported_again = service
                .export(&ctx, "target", tabula_storage::TransferFormat::Json)
                .await?;
            prop_assert_eq!(exported_again.rows, document.rows);
            Ok::<(), TestCaseError>(())
        })?;
    }
}

#[test]
fn test_unknown_filter_is_reported_not_fatal() -> Result<(), TabulaError> {
    runtime().block_on(async {
        let service = sqlite_service().await?;
        let ctx = dashboard_ctx(OWNER);
        service
            .create_table(&ctx, "t", vec![ColumnDescriptor::new("a", ColumnType::Integer)])
            .await?;
        let listing = service
            .list_rows(OWNER, "t", &RowQuery::from_params([("nope__gt", "1"), ("a__between", "1")]))
            .await?;
        assert_eq!(listing.ignored_filters, vec!["nope__gt", "a__between"]);
        assert!(matches!(
            service.create_table(&ctx, "t", vec![ColumnDescriptor::new("a", ColumnType::Integer)]).await,
            Err(TabulaError::Validation(ValidationError::TableAlreadyExists { .. }))
        ));
        Ok(())
    })
}
