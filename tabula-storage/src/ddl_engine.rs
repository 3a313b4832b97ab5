//! DDL engine: applies schema changes to the physical table and the schema
//! store together.
//!
//! The two writes are separate calls. A failure between them is logged as a
//! consistency gap for manual reconciliation and is not rolled back.

use chrono::Utc;
use tabula_core::ddl::{self, DropColumnPlan};
use tabula_core::identifier;
use tabula_core::{
    validate_column_list, ColumnDescriptor, IdentifierKind, NotFoundError, OwnerId, Statement,
    TableDescriptor, TabulaError, TabulaResult, ValidationError,
};
use tracing::{error, info};

use crate::backend::SharedBackend;
use crate::catalog::SchemaStore;

#[derive(Clone)]
pub struct DdlEngine {
    backend: SharedBackend,
    store: SchemaStore,
}

/// Log a store/physical mismatch and hand the original error back.
fn consistency_gap(table: &TableDescriptor, step: &'static str, err: TabulaError) -> TabulaError {
    error!(
        owner = %table.owner,
        table = %table.name,
        physical = %table.physical_name,
        step,
        error = %err,
        "schema store and physical table diverged"
    );
    err
}

impl DdlEngine {
    pub fn new(backend: SharedBackend, store: SchemaStore) -> Self {
        Self { backend, store }
    }

    pub fn store(&self) -> &SchemaStore {
        &self.store
    }

    async fn run(&self, sql: String) -> TabulaResult<()> {
        self.backend.execute(&Statement::new(sql)).await?;
        Ok(())
    }

    /// Create the physical table, then persist its descriptor.
    pub async fn create_table(
        &self,
        owner: OwnerId,
        name: &str,
        columns: Vec<ColumnDescriptor>,
    ) -> TabulaResult<TableDescriptor> {
        let table = TableDescriptor::new(owner, name, columns, Utc::now())?;
        validate_column_list(&table.columns)?;
        if self.store.name_taken(owner, name).await? {
            return Err(ValidationError::TableAlreadyExists {
                name: name.to_string(),
            }
            .into());
        }

        let dialect = self.backend.dialect();
        self.run(ddl::create_table(dialect, &table.physical_name, &table.columns)?)
            .await?;
        self.store
            .create(&table)
            .await
            .map_err(|e| consistency_gap(&table, "persist_descriptor", e))?;

        info!(
            %owner,
            table = %table.name,
            physical = %table.physical_name,
            columns = table.columns.len(),
            "table created"
        );
        Ok(table)
    }

    /// Drop the physical table if present, then forget the descriptor.
    pub async fn drop_table(&self, owner: OwnerId, name: &str) -> TabulaResult<TableDescriptor> {
        let table = self.store.get(owner, name).await?;
        self.run(ddl::drop_table(self.backend.dialect(), &table.physical_name)?)
            .await?;
        self.store
            .delete(owner, name)
            .await
            .map_err(|e| consistency_gap(&table, "delete_descriptor", e))?;

        info!(%owner, table = %table.name, physical = %table.physical_name, "table dropped");
        Ok(table)
    }

    pub async fn add_column(
        &self,
        owner: OwnerId,
        name: &str,
        column: ColumnDescriptor,
    ) -> TabulaResult<TableDescriptor> {
        let mut table = self.store.get(owner, name).await?;
        if column.pk {
            return Err(ValidationError::InvalidValue {
                field: "pk".to_string(),
                reason: "a primary key column cannot be added to an existing table".to_string(),
            }
            .into());
        }

        let mut columns = table.columns.clone();
        columns.push(column.clone());
        validate_column_list(&columns)?;

        self.run(ddl::add_column(self.backend.dialect(), &table.physical_name, &column)?)
            .await?;
        table.columns = columns;
        self.store
            .update_columns(owner, name, &table.columns)
            .await
            .map_err(|e| consistency_gap(&table, "store_added_column", e))?;

        info!(%owner, table = %table.name, column = %column.name, "column added");
        Ok(table)
    }

    /// Native rename only. The column keeps its position and flags.
    pub async fn rename_column(
        &self,
        owner: OwnerId,
        name: &str,
        old_name: &str,
        new_name: &str,
    ) -> TabulaResult<TableDescriptor> {
        let mut table = self.store.get(owner, name).await?;
        let position = table
            .columns
            .iter()
            .position(|c| c.name == old_name)
            .ok_or_else(|| NotFoundError::Column {
                name: old_name.to_string(),
            })?;
        if old_name == new_name {
            return Err(ValidationError::InvalidValue {
                field: "new_name".to_string(),
                reason: "new name must differ from the old name".to_string(),
            }
            .into());
        }
        identifier::validate(IdentifierKind::Column, new_name)?;
        let clashes = table
            .columns
            .iter()
            .enumerate()
            .any(|(i, c)| i != position && identifier::same_identifier(&c.name, new_name));
        if clashes {
            return Err(ValidationError::DuplicateColumn {
                name: new_name.to_string(),
            }
            .into());
        }

        let sql = ddl::rename_column(self.backend.dialect(), &table.physical_name, old_name, new_name)?;
        self.run(sql).await?;
        table.columns[position].name = new_name.to_string();
        self.store
            .update_columns(owner, name, &table.columns)
            .await
            .map_err(|e| consistency_gap(&table, "store_renamed_column", e))?;

        info!(%owner, table = %table.name, old_name, new_name, "column renamed");
        Ok(table)
    }

    /// Drop natively where possible, otherwise rebuild the table without the
    /// column inside one transaction.
    pub async fn drop_column(
        &self,
        owner: OwnerId,
        name: &str,
        column_name: &str,
    ) -> TabulaResult<TableDescriptor> {
        let mut table = self.store.get(owner, name).await?;
        let column = table
            .column(column_name)
            .ok_or_else(|| NotFoundError::Column {
                name: column_name.to_string(),
            })?;
        if column.pk {
            return Err(ValidationError::PrimaryKeyColumn {
                name: column_name.to_string(),
            }
            .into());
        }
        if table.columns.len() == 1 {
            return Err(ValidationError::LastColumn {
                name: column_name.to_string(),
            }
            .into());
        }

        let remaining: Vec<ColumnDescriptor> = table
            .columns
            .iter()
            .filter(|c| c.name != column_name)
            .cloned()
            .collect();

        let dialect = self.backend.dialect();
        let rebuilt = match ddl::drop_column(dialect, &table.physical_name, column_name, &remaining)? {
            DropColumnPlan::Native(sql) => {
                self.run(sql).await?;
                false
            }
            DropColumnPlan::Rebuild(statements) => {
                let statements: Vec<Statement> = statements.into_iter().map(Statement::new).collect();
                self.backend.execute_script(&statements).await?;
                true
            }
        };

        table.columns = remaining;
        self.store
            .update_columns(owner, name, &table.columns)
            .await
            .map_err(|e| consistency_gap(&table, "store_dropped_column", e))?;

        info!(%owner, table = %table.name, column = column_name, rebuilt, "column dropped");
        Ok(table)
    }
}
