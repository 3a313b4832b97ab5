//! Tabula Test Utilities
//!
//! Shared test infrastructure for the Tabula workspace:
//! - Proptest generators for identifiers, column lists and cell values
//! - An in-memory activity sink
//! - Fixtures for an in-memory SQLite service and request contexts
//! - Assertions on the error taxonomy

// Re-export core types for convenience
pub use tabula_core::{
    ActionKind, ActivityRecord, AuthError, ColumnDescriptor, ColumnType, IdentifierKind,
    NotFoundError, OwnerId, Principal, RequestContext, Row, RowQuery, StorageError,
    TableDescriptor, TabulaError, TabulaResult, Timestamp, ValidationError, Value,
};
pub use tabula_storage::{ActivitySink, TableService};

use async_trait::async_trait;
use std::sync::Mutex;

// ============================================================================
// MEMORY ACTIVITY SINK
// ============================================================================

/// Activity sink that keeps records in memory for inspection.
#[derive(Debug, Default)]
pub struct MemoryActivitySink {
    records: Mutex<Vec<ActivityRecord>>,
}

impl MemoryActivitySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far, oldest first.
    pub fn records(&self) -> Vec<ActivityRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<ActionKind> {
        self.records().into_iter().map(|r| r.action).collect()
    }
}

#[async_trait]
impl ActivitySink for MemoryActivitySink {
    async fn record(&self, record: ActivityRecord) -> TabulaResult<()> {
        self.records
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .push(record);
        Ok(())
    }
}

/// Sink that rejects every record, for exercising the failure path.
#[derive(Debug, Default)]
pub struct FailingActivitySink;

#[async_trait]
impl ActivitySink for FailingActivitySink {
    async fn record(&self, _record: ActivityRecord) -> TabulaResult<()> {
        Err(StorageError::Connection {
            reason: "activity sink offline".to_string(),
        }
        .into())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating Tabula inputs.

    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value as JsonValue};
    use std::collections::HashSet;
    use tabula_core::identifier;

    /// Generate a valid logical table name.
    pub fn arb_table_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,19}".prop_filter("must pass the identifier gate", |name| {
            identifier::validate(IdentifierKind::Table, name).is_ok()
        })
    }

    /// Generate a valid column name.
    pub fn arb_column_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,14}".prop_filter("must pass the identifier gate", |name| {
            identifier::validate(IdentifierKind::Column, name).is_ok()
        })
    }

    /// Generate a ColumnType variant.
    pub fn arb_column_type() -> impl Strategy<Value = ColumnType> {
        prop::sample::select(ColumnType::ALL.to_vec())
    }

    /// Generate a plain column: no key, nullable, not unique, so random
    /// rows always insert.
    pub fn arb_column() -> impl Strategy<Value = ColumnDescriptor> {
        (arb_column_name(), arb_column_type()).prop_map(|(name, ty)| ColumnDescriptor::new(name, ty))
    }

    /// Generate a valid column list: unique names and at most one primary
    /// key, which when present is an INTEGER in first position.
    pub fn arb_column_list(max: usize) -> impl Strategy<Value = Vec<ColumnDescriptor>> {
        (prop::collection::vec(arb_column(), 1..=max.max(1)), any::<bool>()).prop_map(
            |(columns, with_key)| {
                let mut seen = HashSet::new();
                let mut list: Vec<ColumnDescriptor> = columns
                    .into_iter()
                    .filter(|c| c.name != "id" && seen.insert(c.name.to_ascii_lowercase()))
                    .collect();
                if list.is_empty() {
                    list.push(ColumnDescriptor::new("value", ColumnType::Text));
                }
                if with_key {
                    list.insert(0, ColumnDescriptor::new("id", ColumnType::Integer).primary_key());
                }
                list
            },
        )
    }

    /// Generate a column list with two or more primary keys.
    pub fn arb_multi_key_column_list() -> impl Strategy<Value = Vec<ColumnDescriptor>> {
        (arb_column_list(5), 2usize..4).prop_map(|(mut columns, extra)| {
            for (i, ty) in ColumnType::ALL.iter().take(extra).enumerate() {
                columns.push(ColumnDescriptor::new(format!("key_{}", i), *ty).primary_key());
            }
            columns
        })
    }

    /// Generate a JSON request value that coerces cleanly to `column_type`
    /// and reads back unchanged.
    pub fn arb_json_for(column_type: ColumnType) -> BoxedStrategy<JsonValue> {
        match column_type {
            ColumnType::Text => "[a-zA-Z0-9 ,.]{0,24}".prop_map(JsonValue::String).boxed(),
            ColumnType::Integer => (-1_000_000_000i64..1_000_000_000)
                .prop_map(|i| json!(i))
                .boxed(),
            ColumnType::Real => (-1_000_000i32..1_000_000)
                .prop_map(|i| json!(f64::from(i) / 4.0))
                .boxed(),
            ColumnType::Boolean => any::<bool>().prop_map(|b| json!(b)).boxed(),
            ColumnType::Datetime => arb_timestamp()
                .prop_map(|ts| json!(ts.format("%Y-%m-%dT%H:%M:%S").to_string()))
                .boxed(),
            // Base64 of 0-3 bytes drawn from a fixed alphabet of encodings.
            ColumnType::Blob => prop::sample::select(vec!["", "AQ==", "AQI=", "AQID", "/w=="])
                .prop_map(|s| json!(s))
                .boxed(),
        }
    }

    /// Generate a row body covering every column of `columns` except a
    /// primary key.
    pub fn arb_row_for(
        columns: &[ColumnDescriptor],
    ) -> impl Strategy<Value = serde_json::Map<String, JsonValue>> {
        let fields: Vec<(String, BoxedStrategy<JsonValue>)> = columns
            .iter()
            .filter(|c| !c.pk)
            .map(|c| (c.name.clone(), arb_json_for(c.column_type)))
            .collect();
        let (names, strategies): (Vec<String>, Vec<BoxedStrategy<JsonValue>>) =
            fields.into_iter().unzip();
        strategies.prop_map(move |values| names.iter().cloned().zip(values).collect())
    }

    /// Generate a Timestamp (DateTime<Utc>) with whole seconds.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // Generate timestamps within a reasonable range (2020-2030)
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(chrono::Utc::now)
        })
    }

    /// Generate a string that is never a valid identifier.
    pub fn arb_hostile_name() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z]{1,8}[\"'; -][a-z]{0,8}",
            "[0-9]{1,6}",
            Just(String::new()),
            Just("x\"; DROP TABLE tabula_tables; --".to_string()),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;
    use serde_json::{Map, Value as JsonValue};
    use std::sync::Arc;
    use tabula_core::StaticOwnerDirectory;
    use tabula_storage::{SharedBackend, SqliteBackend};

    pub const OWNER: OwnerId = OwnerId(1);

    /// Fresh service over an empty in-memory SQLite database.
    pub async fn sqlite_service() -> TabulaResult<TableService> {
        sqlite_service_with(StaticOwnerDirectory::default()).await
    }

    /// Same as [`sqlite_service`] with a custom owner directory.
    pub async fn sqlite_service_with(directory: StaticOwnerDirectory) -> TabulaResult<TableService> {
        let backend: SharedBackend = Arc::new(SqliteBackend::in_memory()?);
        TableService::with_backend(backend, Arc::new(directory)).await
    }

    /// Service whose activity records land in the returned sink.
    pub async fn sqlite_service_recording() -> TabulaResult<(TableService, Arc<MemoryActivitySink>)> {
        let sink = Arc::new(MemoryActivitySink::new());
        let service = sqlite_service().await?.with_activity_sink(sink.clone());
        Ok((service, sink))
    }

    pub fn dashboard_ctx(owner: OwnerId) -> RequestContext {
        RequestContext::new(Principal::dashboard(owner))
    }

    pub fn api_ctx(owner: OwnerId, key_name: &str) -> RequestContext {
        RequestContext::new(Principal::api_key(owner, key_name))
    }

    /// A typical catalogue table touching every column type.
    pub fn product_columns() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("id", ColumnType::Integer).primary_key(),
            ColumnDescriptor::new("name", ColumnType::Text).not_null(),
            ColumnDescriptor::new("price", ColumnType::Real),
            ColumnDescriptor::new("in_stock", ColumnType::Boolean)
                .with_default(serde_json::json!(true)),
            ColumnDescriptor::new("added", ColumnType::Datetime),
            ColumnDescriptor::new("thumb", ColumnType::Blob),
        ]
    }

    /// Unwrap a `json!` object literal into a map.
    pub fn object(value: JsonValue) -> Map<String, JsonValue> {
        match value {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on the Tabula error taxonomy.

    use super::*;

    /// Assert that a TabulaResult is a validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &TabulaResult<T>) {
        match result {
            Err(TabulaError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a TabulaResult is a not-found error.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &TabulaResult<T>) {
        match result {
            Err(TabulaError::NotFound(_)) => {}
            other => panic!("Expected NotFound error, got: {:?}", other),
        }
    }

    /// Assert that a TabulaResult is a specific authentication error.
    #[track_caller]
    pub fn assert_auth_error<T: std::fmt::Debug>(result: &TabulaResult<T>, expected: AuthError) {
        match result {
            Err(TabulaError::Auth(err)) => assert_eq!(*err, expected, "Wrong auth error"),
            other => panic!("Expected Auth error {:?}, got: {:?}", expected, other),
        }
    }

    /// Assert that two rows agree on every column of `columns`.
    #[track_caller]
    pub fn assert_rows_match(expected: &Row, actual: &Row, columns: &[&str]) {
        for column in columns {
            assert_eq!(
                expected.get(column),
                actual.get(column),
                "column '{}' differs",
                column
            );
        }
    }
}
