//! API key store.
//!
//! Raw keys are generated here, handed to the caller once and never stored.
//! Lookups go through the SHA-256 hash only.

use chrono::{TimeZone, Utc};
use rand::RngCore;
use std::sync::Arc;
use tabula_core::credential::{display_prefix, format_api_key, has_api_key_shape, hash_api_key};
use tabula_core::{
    ApiKeyRecord, AuthError, ColumnType, NotFoundError, OwnerDirectory, OwnerId, Principal,
    Statement, StorageError, TabulaError, TabulaResult, Timestamp, ValidationError, Value,
};
use tracing::{debug, info};

use crate::backend::SharedBackend;
use crate::bootstrap::API_KEYS_TABLE;

const SELECT_COLUMNS: &str = "id, owner_id, name, key_prefix, created_at, last_used_at, is_active";

/// A freshly created key. The only place the raw secret ever appears.
#[derive(Debug, Clone)]
pub struct IssuedApiKey {
    pub raw_key: String,
    pub record: ApiKeyRecord,
}

#[derive(Clone)]
pub struct ApiKeyStore {
    backend: SharedBackend,
    owners: Arc<dyn OwnerDirectory>,
}

impl ApiKeyStore {
    pub fn new(backend: SharedBackend, owners: Arc<dyn OwnerDirectory>) -> Self {
        Self { backend, owners }
    }

    fn placeholder(&self, index: usize) -> String {
        self.backend.dialect().placeholder(index)
    }

    pub async fn create(&self, owner: OwnerId, name: &str) -> TabulaResult<IssuedApiKey> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "name".to_string(),
            }
            .into());
        }

        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        let raw_key = format_api_key(&secret);
        let key_prefix = display_prefix(&raw_key);
        let created_at = Utc::now();

        let dialect = self.backend.dialect();
        let returning = if dialect.capabilities().insert_returning {
            " RETURNING id"
        } else {
            ""
        };
        let statement = Statement::with_params(
            format!(
                "INSERT INTO {} (owner_id, name, key_prefix, key_hash, created_at, is_active) VALUES ({}, {}, {}, {}, {}, {}){}",
                API_KEYS_TABLE,
                self.placeholder(1),
                self.placeholder(2),
                self.placeholder(3),
                self.placeholder(4),
                self.placeholder(5),
                self.placeholder(6),
                returning,
            ),
            vec![
                Value::Integer(owner.as_i64()),
                Value::Text(name.to_string()),
                Value::Text(key_prefix.clone()),
                Value::Text(hash_api_key(&raw_key)),
                Value::Timestamp(created_at.naive_utc()),
                Value::Boolean(true),
            ],
        );
        let id = self
            .backend
            .insert(&statement, !returning.is_empty())
            .await?
            .and_then(|id| id.as_i64())
            .ok_or_else(|| corrupt("insert did not return an id"))?;

        info!(%owner, key_id = id, "api key created");
        Ok(IssuedApiKey {
            raw_key,
            record: ApiKeyRecord {
                id,
                owner,
                name: name.to_string(),
                key_prefix,
                created_at,
                last_used_at: None,
                is_active: true,
            },
        })
    }

    /// Newest first.
    pub async fn list(&self, owner: OwnerId) -> TabulaResult<Vec<ApiKeyRecord>> {
        let result = self
            .backend
            .query(&Statement::with_params(
                format!(
                    "SELECT {} FROM {} WHERE owner_id = {} ORDER BY created_at DESC, id DESC",
                    SELECT_COLUMNS,
                    API_KEYS_TABLE,
                    self.placeholder(1)
                ),
                vec![Value::Integer(owner.as_i64())],
            ))
            .await?;
        result.rows.into_iter().map(decode_record).collect()
    }

    pub async fn delete(&self, owner: OwnerId, id: i64) -> TabulaResult<()> {
        let affected = self
            .backend
            .execute(&Statement::with_params(
                format!(
                    "DELETE FROM {} WHERE id = {} AND owner_id = {}",
                    API_KEYS_TABLE,
                    self.placeholder(1),
                    self.placeholder(2)
                ),
                vec![Value::Integer(id), Value::Integer(owner.as_i64())],
            ))
            .await?;
        if affected == 0 {
            return Err(NotFoundError::ApiKey { id }.into());
        }
        info!(%owner, key_id = id, "api key deleted");
        Ok(())
    }

    pub async fn set_active(&self, owner: OwnerId, id: i64, active: bool) -> TabulaResult<()> {
        let affected = self
            .backend
            .execute(&Statement::with_params(
                format!(
                    "UPDATE {} SET is_active = {} WHERE id = {} AND owner_id = {}",
                    API_KEYS_TABLE,
                    self.placeholder(1),
                    self.placeholder(2),
                    self.placeholder(3)
                ),
                vec![
                    Value::Boolean(active),
                    Value::Integer(id),
                    Value::Integer(owner.as_i64()),
                ],
            ))
            .await?;
        if affected == 0 {
            return Err(NotFoundError::ApiKey { id }.into());
        }
        info!(%owner, key_id = id, active, "api key toggled");
        Ok(())
    }

    /// Resolve a raw key to its principal and refresh `last_used_at`.
    ///
    /// Malformed, unknown and inactive keys all fail the same way so callers
    /// cannot tell which keys exist.
    pub async fn authenticate(&self, raw_key: &str) -> TabulaResult<Principal> {
        if !has_api_key_shape(raw_key) {
            return Err(AuthError::InvalidCredential.into());
        }

        let result = self
            .backend
            .query(&Statement::with_params(
                format!(
                    "SELECT {} FROM {} WHERE key_hash = {}",
                    SELECT_COLUMNS,
                    API_KEYS_TABLE,
                    self.placeholder(1)
                ),
                vec![Value::Text(hash_api_key(raw_key))],
            ))
            .await?;
        let record = match result.rows.into_iter().next() {
            Some(row) => decode_record(row)?,
            None => return Err(AuthError::InvalidCredential.into()),
        };
        if !record.is_active {
            return Err(AuthError::InvalidCredential.into());
        }
        if !self.owners.is_active(record.owner) {
            return Err(AuthError::OwnerDisabled.into());
        }

        self.touch(record.id, Utc::now()).await?;
        debug!(owner = %record.owner, key_id = record.id, "api key authenticated");
        Ok(Principal::api_key(record.owner, record.name))
    }

    async fn touch(&self, id: i64, at: Timestamp) -> TabulaResult<()> {
        self.backend
            .execute(&Statement::with_params(
                format!(
                    "UPDATE {} SET last_used_at = {} WHERE id = {}",
                    API_KEYS_TABLE,
                    self.placeholder(1),
                    self.placeholder(2)
                ),
                vec![Value::Timestamp(at.naive_utc()), Value::Integer(id)],
            ))
            .await?;
        Ok(())
    }
}

fn corrupt(reason: impl Into<String>) -> TabulaError {
    StorageError::CorruptMetadata {
        what: API_KEYS_TABLE.to_string(),
        reason: reason.into(),
    }
    .into()
}

fn timestamp(value: Value) -> Option<Timestamp> {
    value
        .conform(ColumnType::Datetime)
        .as_timestamp()
        .map(|ts| Utc.from_utc_datetime(&ts))
}

fn decode_record(row: Vec<Value>) -> TabulaResult<ApiKeyRecord> {
    let [id, owner, name, key_prefix, created_at, last_used_at, is_active]: [Value; 7] =
        row.try_into().map_err(|_| corrupt("unexpected column count"))?;

    Ok(ApiKeyRecord {
        id: id.as_i64().ok_or_else(|| corrupt("id is not an integer"))?,
        owner: owner
            .as_i64()
            .map(OwnerId)
            .ok_or_else(|| corrupt("owner_id is not an integer"))?,
        name: name
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| corrupt("name is not text"))?,
        key_prefix: key_prefix
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| corrupt("key_prefix is not text"))?,
        created_at: timestamp(created_at).ok_or_else(|| corrupt("created_at is not a timestamp"))?,
        last_used_at: timestamp(last_used_at),
        is_active: is_active
            .conform(ColumnType::Boolean)
            .as_bool()
            .ok_or_else(|| corrupt("is_active is not a boolean"))?,
    })
}
