//! `TableService`: the single entry point used by the HTTP layer.
//!
//! Resolves the logical table for the calling principal, delegates to the
//! DDL and row engines and emits one activity record per successful
//! mutation.

use chrono::{NaiveTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;
use tabula_core::{
    ActionKind, ActivityRecord, ColumnDescriptor, OwnerDirectory, OwnerId, RequestContext, Row,
    RowQuery, Source, TableDescriptor, TabulaResult, Timestamp, Value,
};
use tracing::warn;

use crate::activity::{
    record_or_warn, ActivityPage, ActivityQuery, SharedActivitySink, SqlActivityLog,
};
use crate::api_keys::ApiKeyStore;
use crate::backend::{PostgresBackend, SharedBackend, SqliteBackend};
use crate::bootstrap::bootstrap;
use crate::catalog::SchemaStore;
use crate::config::StorageConfig;
use crate::ddl_engine::DdlEngine;
use crate::rows::{RowEngine, RowListing};
use crate::transfer::{self, ExportDocument, ImportReport, TransferFormat};

/// One entry of the table listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub row_count: u64,
    pub created_at: Timestamp,
}

/// Schema view of one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
    pub table_name: String,
    pub row_count: u64,
    pub columns: Vec<ColumnDescriptor>,
}

/// Dashboard counters for one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerStats {
    pub total_tables: u64,
    pub total_rows: u64,
    pub database_size: u64,
    pub actions_today: u64,
}

#[derive(Clone)]
pub struct TableService {
    backend: SharedBackend,
    ddl: DdlEngine,
    rows: RowEngine,
    activity: SharedActivitySink,
    activity_log: SqlActivityLog,
    api_keys: ApiKeyStore,
}

impl TableService {
    /// Connect to the configured engine and bring its metadata tables up.
    pub async fn open(config: &StorageConfig, owners: Arc<dyn OwnerDirectory>) -> TabulaResult<Self> {
        let backend: SharedBackend = match config {
            StorageConfig::Sqlite(sqlite) => Arc::new(SqliteBackend::open(sqlite)?),
            StorageConfig::Postgres(pg) => Arc::new(PostgresBackend::from_config(pg)?),
        };
        Self::with_backend(backend, owners).await
    }

    pub async fn with_backend(
        backend: SharedBackend,
        owners: Arc<dyn OwnerDirectory>,
    ) -> TabulaResult<Self> {
        bootstrap(backend.as_ref()).await?;
        let store = SchemaStore::new(Arc::clone(&backend));
        let activity_log = SqlActivityLog::new(Arc::clone(&backend));
        Ok(Self {
            ddl: DdlEngine::new(Arc::clone(&backend), store),
            rows: RowEngine::new(Arc::clone(&backend)),
            activity: Arc::new(activity_log.clone()),
            activity_log,
            api_keys: ApiKeyStore::new(Arc::clone(&backend), owners),
            backend,
        })
    }

    /// Send activity records somewhere other than the metadata table.
    pub fn with_activity_sink(mut self, sink: SharedActivitySink) -> Self {
        self.activity = sink;
        self
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    pub fn api_keys(&self) -> &ApiKeyStore {
        &self.api_keys
    }

    pub fn store(&self) -> &SchemaStore {
        self.ddl.store()
    }

    async fn record(&self, record: ActivityRecord) {
        record_or_warn(self.activity.as_ref(), record).await;
    }

    // ========================================================================
    // TABLES
    // ========================================================================

    pub async fn list_tables(&self, owner: OwnerId) -> TabulaResult<Vec<TableSummary>> {
        let tables = self.store().list_for_owner(owner).await?;
        let mut summaries = Vec::with_capacity(tables.len());
        for table in tables {
            summaries.push(TableSummary {
                row_count: self.row_count_or_zero(&table).await,
                name: table.name,
                created_at: table.created_at,
            });
        }
        Ok(summaries)
    }

    pub async fn table(&self, owner: OwnerId, name: &str) -> TabulaResult<TableDescriptor> {
        self.store().get(owner, name).await
    }

    pub async fn describe_table(&self, owner: OwnerId, name: &str) -> TabulaResult<TableSchema> {
        let table = self.table(owner, name).await?;
        Ok(TableSchema {
            row_count: self.rows.count(&table).await?,
            table_name: table.name,
            columns: table.columns,
        })
    }

    pub async fn create_table(
        &self,
        ctx: &RequestContext,
        name: &str,
        columns: Vec<ColumnDescriptor>,
    ) -> TabulaResult<TableDescriptor> {
        let table = self.ddl.create_table(ctx.owner(), name, columns).await?;
        let names: Vec<&str> = table.column_names();
        self.record(
            ActivityRecord::new(
                ctx,
                ActionKind::CreateTable,
                &table.name,
                via_api(
                    ctx,
                    format!("Created table \"{}\" with {} columns", table.name, table.columns.len()),
                ),
            )
            .with_metadata(json!({ "columns": names })),
        )
        .await;
        Ok(table)
    }

    pub async fn drop_table(&self, ctx: &RequestContext, name: &str) -> TabulaResult<()> {
        let table = self.ddl.drop_table(ctx.owner(), name).await?;
        self.record(ActivityRecord::new(
            ctx,
            ActionKind::DeleteTable,
            &table.name,
            via_api(ctx, format!("Deleted table \"{}\"", table.name)),
        ))
        .await;
        Ok(())
    }

    // ========================================================================
    // COLUMNS
    // ========================================================================

    pub async fn add_column(
        &self,
        ctx: &RequestContext,
        table: &str,
        column: ColumnDescriptor,
    ) -> TabulaResult<TableDescriptor> {
        let descriptor = self.ddl.add_column(ctx.owner(), table, column.clone()).await?;
        self.record(
            ActivityRecord::new(
                ctx,
                ActionKind::AddColumn,
                table,
                via_api(
                    ctx,
                    format!(
                        "Added column \"{}\" ({}) to \"{}\"",
                        column.name, column.column_type, table
                    ),
                ),
            )
            .with_metadata(json!({ "column": column.name, "type": column.column_type })),
        )
        .await;
        Ok(descriptor)
    }

    pub async fn rename_column(
        &self,
        ctx: &RequestContext,
        table: &str,
        old_name: &str,
        new_name: &str,
    ) -> TabulaResult<TableDescriptor> {
        let descriptor = self
            .ddl
            .rename_column(ctx.owner(), table, old_name, new_name)
            .await?;
        self.record(
            ActivityRecord::new(
                ctx,
                ActionKind::RenameColumn,
                table,
                via_api(
                    ctx,
                    format!("Renamed column \"{}\" to \"{}\" in \"{}\"", old_name, new_name, table),
                ),
            )
            .with_metadata(json!({ "old_name": old_name, "new_name": new_name })),
        )
        .await;
        Ok(descriptor)
    }

    pub async fn drop_column(
        &self,
        ctx: &RequestContext,
        table: &str,
        column: &str,
    ) -> TabulaResult<TableDescriptor> {
        let descriptor = self.ddl.drop_column(ctx.owner(), table, column).await?;
        self.record(
            ActivityRecord::new(
                ctx,
                ActionKind::DeleteColumn,
                table,
                via_api(ctx, format!("Deleted column \"{}\" from \"{}\"", column, table)),
            )
            .with_metadata(json!({ "column": column })),
        )
        .await;
        Ok(descriptor)
    }

    // ========================================================================
    // ROWS
    // ========================================================================

    pub async fn list_rows(
        &self,
        owner: OwnerId,
        table: &str,
        query: &RowQuery,
    ) -> TabulaResult<RowListing> {
        let table = self.table(owner, table).await?;
        self.rows.list(&table, query).await
    }

    pub async fn get_row(&self, owner: OwnerId, table: &str, row_id: &str) -> TabulaResult<Row> {
        let table = self.table(owner, table).await?;
        self.rows.get(&table, row_id).await
    }

    /// Insert one row, returning the identifier the engine reported.
    pub async fn insert_row(
        &self,
        ctx: &RequestContext,
        table: &str,
        data: &Map<String, JsonValue>,
    ) -> TabulaResult<Option<Value>> {
        let descriptor = self.table(ctx.owner(), table).await?;
        let id = self.rows.insert(&descriptor, data).await?;

        let description = match ctx.principal.source {
            Source::Api => format!("Inserted row via API into \"{}\"", table),
            Source::Dashboard => format!("Inserted new row in \"{}\"", table),
        };
        let row_id = id.as_ref().map(Value::to_json).unwrap_or(JsonValue::Null);
        self.record(
            ActivityRecord::new(ctx, ActionKind::InsertRow, table, description)
                .with_metadata(json!({ "row_id": row_id, "data": data })),
        )
        .await;
        Ok(id)
    }

    /// Update one row and return the affected count. Nothing is recorded
    /// when no row matched.
    pub async fn update_row(
        &self,
        ctx: &RequestContext,
        table: &str,
        row_id: &str,
        data: &Map<String, JsonValue>,
    ) -> TabulaResult<u64> {
        let descriptor = self.table(ctx.owner(), table).await?;
        let affected = self.rows.update(&descriptor, row_id, data).await?;
        if affected > 0 {
            let description = match ctx.principal.source {
                Source::Api => format!("Updated row {} via API in \"{}\"", row_id, table),
                Source::Dashboard => format!("Updated row {} in \"{}\"", row_id, table),
            };
            let fields: Vec<&String> = data.keys().collect();
            self.record(
                ActivityRecord::new(ctx, ActionKind::UpdateRow, table, description)
                    .with_metadata(json!({ "row_id": row_id, "updated_fields": fields })),
            )
            .await;
        }
        Ok(affected)
    }

    /// Delete one row and return the affected count. Nothing is recorded
    /// when no row matched.
    pub async fn delete_row(
        &self,
        ctx: &RequestContext,
        table: &str,
        row_id: &str,
    ) -> TabulaResult<u64> {
        let descriptor = self.table(ctx.owner(), table).await?;
        let affected = self.rows.delete(&descriptor, row_id).await?;
        if affected > 0 {
            let description = match ctx.principal.source {
                Source::Api => format!("Deleted row {} via API from \"{}\"", row_id, table),
                Source::Dashboard => format!("Deleted row {} from \"{}\"", row_id, table),
            };
            self.record(
                ActivityRecord::new(ctx, ActionKind::DeleteRow, table, description)
                    .with_metadata(json!({ "row_id": row_id })),
            )
            .await;
        }
        Ok(affected)
    }

    // ========================================================================
    // TRANSFER
    // ========================================================================

    pub async fn export(
        &self,
        ctx: &RequestContext,
        table: &str,
        format: TransferFormat,
    ) -> TabulaResult<ExportDocument> {
        let descriptor = self.table(ctx.owner(), table).await?;
        let document = transfer::export(&self.rows, &descriptor).await?;
        self.record(
            ActivityRecord::new(
                ctx,
                ActionKind::ExportData,
                table,
                format!(
                    "Exported {} rows from \"{}\" as {}",
                    document.row_count,
                    table,
                    format.as_str().to_uppercase()
                ),
            )
            .with_metadata(json!({ "format": format.as_str(), "row_count": document.row_count })),
        )
        .await;
        Ok(document)
    }

    pub async fn import(
        &self,
        ctx: &RequestContext,
        table: &str,
        format: TransferFormat,
        data: &[JsonValue],
    ) -> TabulaResult<ImportReport> {
        let descriptor = self.table(ctx.owner(), table).await?;
        let report = transfer::import(&self.rows, &descriptor, data).await?;
        self.record(
            ActivityRecord::new(
                ctx,
                ActionKind::ImportData,
                table,
                format!(
                    "Imported {} rows into \"{}\" from {}",
                    report.imported,
                    table,
                    format.as_str().to_uppercase()
                ),
            )
            .with_metadata(json!({
                "format": format.as_str(),
                "imported": report.imported,
                "errors": report.total_errors,
            })),
        )
        .await;
        Ok(report)
    }

    // ========================================================================
    // ACTIVITY & STATS
    // ========================================================================

    pub async fn list_activity(
        &self,
        owner: OwnerId,
        query: &ActivityQuery,
    ) -> TabulaResult<ActivityPage> {
        self.activity_log.list(owner, query).await
    }

    pub async fn stats(&self, owner: OwnerId) -> TabulaResult<OwnerStats> {
        let tables = self.store().list_for_owner(owner).await?;
        let mut total_rows = 0;
        for table in &tables {
            total_rows += self.row_count_or_zero(table).await;
        }

        let midnight = Utc::now()
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc();
        Ok(OwnerStats {
            total_tables: tables.len() as u64,
            total_rows,
            database_size: self.backend.database_size().await?.unwrap_or(0),
            actions_today: self.activity_log.count_since(owner, midnight).await?,
        })
    }

    pub async fn ping(&self) -> TabulaResult<()> {
        self.backend.ping().await
    }

    /// Row count for listings; a table whose physical side is unreadable
    /// shows as empty instead of failing the whole listing.
    async fn row_count_or_zero(&self, table: &TableDescriptor) -> u64 {
        match self.rows.count(table).await {
            Ok(count) => count,
            Err(e) => {
                warn!(owner = %table.owner, table = %table.name, error = %e, "row count failed");
                0
            }
        }
    }
}

fn via_api(ctx: &RequestContext, description: String) -> String {
    match ctx.principal.source {
        Source::Api => format!("{} via API", description),
        Source::Dashboard => description,
    }
}
