//! Schema store: the durable mapping from `(owner, logical name)` to a
//! table descriptor. Source of truth for which columns logically exist.

use chrono::{TimeZone, Utc};
use tabula_core::{
    ColumnDescriptor, ColumnType, NotFoundError, OwnerId, Statement, StorageError,
    TableDescriptor, TabulaResult, Value,
};

use crate::backend::SharedBackend;
use crate::bootstrap::TABLES_TABLE;

const SELECT_COLUMNS: &str = "owner_id, table_name, physical_name, schema_json, created_at";

#[derive(Clone)]
pub struct SchemaStore {
    backend: SharedBackend,
}

impl SchemaStore {
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    fn placeholder(&self, index: usize) -> String {
        self.backend.dialect().placeholder(index)
    }

    /// Persist a new descriptor. Fails if the owner already has the name.
    pub async fn create(&self, table: &TableDescriptor) -> TabulaResult<()> {
        if self.name_taken(table.owner, &table.name).await? {
            return Err(tabula_core::ValidationError::TableAlreadyExists {
                name: table.name.clone(),
            }
            .into());
        }

        let sql = format!(
            "INSERT INTO {} (owner_id, table_name, physical_name, schema_json, created_at) VALUES ({}, {}, {}, {}, {})",
            TABLES_TABLE,
            self.placeholder(1),
            self.placeholder(2),
            self.placeholder(3),
            self.placeholder(4),
            self.placeholder(5),
        );
        let statement = Statement::with_params(
            sql,
            vec![
                Value::Integer(table.owner.as_i64()),
                Value::Text(table.name.clone()),
                Value::Text(table.physical_name.clone()),
                Value::Text(encode_columns(&table.columns)?),
                Value::Timestamp(table.created_at.naive_utc()),
            ],
        );
        self.backend.execute(&statement).await?;
        Ok(())
    }

    pub async fn find(&self, owner: OwnerId, name: &str) -> TabulaResult<Option<TableDescriptor>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE owner_id = {} AND table_name = {}",
            SELECT_COLUMNS,
            TABLES_TABLE,
            self.placeholder(1),
            self.placeholder(2),
        );
        let result = self
            .backend
            .query(&Statement::with_params(
                sql,
                vec![Value::Integer(owner.as_i64()), Value::Text(name.to_string())],
            ))
            .await?;
        result.rows.into_iter().next().map(decode_descriptor).transpose()
    }

    /// Whether the owner already has a table whose name matches `name`
    /// ignoring ASCII case. SQLite resolves quoted identifiers that way, so
    /// `items` and `Items` would share one physical table.
    pub async fn name_taken(&self, owner: OwnerId, name: &str) -> TabulaResult<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE owner_id = {} AND LOWER(table_name) = LOWER({})",
            TABLES_TABLE,
            self.placeholder(1),
            self.placeholder(2),
        );
        let result = self
            .backend
            .query(&Statement::with_params(
                sql,
                vec![Value::Integer(owner.as_i64()), Value::Text(name.to_string())],
            ))
            .await?;
        Ok(result.scalar_u64()? > 0)
    }

    pub async fn get(&self, owner: OwnerId, name: &str) -> TabulaResult<TableDescriptor> {
        self.find(owner, name).await?.ok_or_else(|| {
            NotFoundError::Table {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// All tables of an owner, oldest first.
    pub async fn list_for_owner(&self, owner: OwnerId) -> TabulaResult<Vec<TableDescriptor>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE owner_id = {} ORDER BY created_at, id",
            SELECT_COLUMNS,
            TABLES_TABLE,
            self.placeholder(1),
        );
        let result = self
            .backend
            .query(&Statement::with_params(sql, vec![Value::Integer(owner.as_i64())]))
            .await?;
        result.rows.into_iter().map(decode_descriptor).collect()
    }

    /// Replace the stored column list. Last write wins.
    pub async fn update_columns(
        &self,
        owner: OwnerId,
        name: &str,
        columns: &[ColumnDescriptor],
    ) -> TabulaResult<()> {
        let sql = format!(
            "UPDATE {} SET schema_json = {} WHERE owner_id = {} AND table_name = {}",
            TABLES_TABLE,
            self.placeholder(1),
            self.placeholder(2),
            self.placeholder(3),
        );
        let affected = self
            .backend
            .execute(&Statement::with_params(
                sql,
                vec![
                    Value::Text(encode_columns(columns)?),
                    Value::Integer(owner.as_i64()),
                    Value::Text(name.to_string()),
                ],
            ))
            .await?;
        if affected == 0 {
            return Err(NotFoundError::Table {
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub async fn delete(&self, owner: OwnerId, name: &str) -> TabulaResult<()> {
        let sql = format!(
            "DELETE FROM {} WHERE owner_id = {} AND table_name = {}",
            TABLES_TABLE,
            self.placeholder(1),
            self.placeholder(2),
        );
        let affected = self
            .backend
            .execute(&Statement::with_params(
                sql,
                vec![Value::Integer(owner.as_i64()), Value::Text(name.to_string())],
            ))
            .await?;
        if affected == 0 {
            return Err(NotFoundError::Table {
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn encode_columns(columns: &[ColumnDescriptor]) -> TabulaResult<String> {
    serde_json::to_string(columns).map_err(|e| {
        StorageError::CorruptMetadata {
            what: "schema".to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn corrupt(what: &str, reason: impl Into<String>) -> tabula_core::TabulaError {
    StorageError::CorruptMetadata {
        what: what.to_string(),
        reason: reason.into(),
    }
    .into()
}

fn decode_descriptor(row: Vec<Value>) -> TabulaResult<TableDescriptor> {
    let [owner, name, physical, schema, created_at]: [Value; 5] = row
        .try_into()
        .map_err(|_| corrupt(TABLES_TABLE, "unexpected column count"))?;

    let owner = owner
        .as_i64()
        .map(OwnerId)
        .ok_or_else(|| corrupt(TABLES_TABLE, "owner_id is not an integer"))?;
    let name = name
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| corrupt(TABLES_TABLE, "table_name is not text"))?;
    let physical_name = physical
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| corrupt(&name, "physical_name is not text"))?;
    let columns: Vec<ColumnDescriptor> = schema
        .as_str()
        .ok_or_else(|| corrupt(&name, "schema_json is not text"))
        .and_then(|json| serde_json::from_str(json).map_err(|e| corrupt(&name, e.to_string())))?;
    let created_at = created_at
        .conform(ColumnType::Datetime)
        .as_timestamp()
        .map(|ts| Utc.from_utc_datetime(&ts))
        .ok_or_else(|| corrupt(&name, "created_at is not a timestamp"))?;

    Ok(TableDescriptor {
        owner,
        name,
        physical_name,
        columns,
        created_at,
    })
}
