//! API Request and Response Types
//!
//! Bodies accepted and returned by the HTTP handlers. Domain types from
//! `tabula-core` and `tabula-storage` are serialised directly where their
//! shape already matches the wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::net::IpAddr;
use tabula_core::{
    ActionKind, ApiKeyRecord, ColumnDescriptor, ColumnType, Row, Source, Timestamp,
};

use crate::error::{ApiError, ApiResult};

// ============================================================================
// GENERIC ENVELOPES
// ============================================================================

/// `{success, message}` acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

// ============================================================================
// TABLE TYPES
// ============================================================================

/// Request to create a new table.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTableRequest {
    /// Logical table name
    #[serde(default, alias = "name")]
    pub table_name: Option<String>,

    /// Column definitions, in order
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
}

impl CreateTableRequest {
    pub fn table_name(&self) -> ApiResult<&str> {
        self.table_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ApiError::missing_field("table_name"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTableResponse {
    pub success: bool,
    pub message: String,
    pub table_name: String,
}

/// Table listing entry on the programmatic surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicTableSummary {
    pub name: String,
    pub row_count: u64,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicTableListResponse {
    pub success: bool,
    pub tables: Vec<PublicTableSummary>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicTableDetailResponse {
    pub success: bool,
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub row_count: u64,
    pub created_at: Timestamp,
}

// ============================================================================
// ROW TYPES
// ============================================================================

/// Dashboard row listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowListResponse {
    pub rows: Vec<Row>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

/// Programmatic row listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicRowListResponse {
    pub success: bool,
    pub rows: Vec<Row>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowResponse {
    pub success: bool,
    pub row: Row,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertRowResponse {
    pub success: bool,
    pub message: String,
    /// Identifier reported by the engine; null for tables without one.
    pub id: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowMutationResponse {
    pub success: bool,
    pub message: String,
    pub affected: u64,
}

// ============================================================================
// COLUMN TYPES
// ============================================================================

/// Request to add a column. `type` defaults to TEXT.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddColumnRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub column_type: Option<String>,
    #[serde(default)]
    pub pk: bool,
    #[serde(default)]
    pub notnull: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub dflt_value: Option<JsonValue>,
}

impl AddColumnRequest {
    pub fn into_descriptor(self) -> ApiResult<ColumnDescriptor> {
        let name = self
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ApiError::missing_field("name"))?;

        let column_type = match self.column_type.as_deref() {
            Some(raw) if !raw.trim().is_empty() => raw.parse::<ColumnType>()?,
            _ => ColumnType::Text,
        };

        Ok(ColumnDescriptor {
            name,
            column_type,
            pk: self.pk,
            notnull: self.notnull,
            unique: self.unique,
            dflt_value: self.dflt_value.filter(|v| !v.is_null()),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenameColumnRequest {
    #[serde(default)]
    pub old_name: Option<String>,
    #[serde(default)]
    pub new_name: Option<String>,
}

impl RenameColumnRequest {
    /// Both names, trimmed. Equal names are refused further down.
    pub fn names(&self) -> ApiResult<(&str, &str)> {
        let old = self.old_name.as_deref().map(str::trim).unwrap_or_default();
        let new = self.new_name.as_deref().map(str::trim).unwrap_or_default();
        if old.is_empty() || new.is_empty() {
            return Err(ApiError::validation_failed(
                "Both old_name and new_name are required",
            ));
        }
        Ok((old, new))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DropColumnRequest {
    #[serde(default)]
    pub name: Option<String>,
}

impl DropColumnRequest {
    pub fn name(&self) -> ApiResult<&str> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ApiError::missing_field("name"))
    }
}

// ============================================================================
// TRANSFER TYPES
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportParams {
    #[serde(default)]
    pub format: Option<String>,
}

/// Request to import rows. `data` stays untyped so a non-list body gets a
/// precise message instead of a deserialisation error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportRequest {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub data: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportResponse {
    pub success: bool,
    pub imported: u64,
    pub errors: Vec<String>,
    pub total_errors: usize,
}

// ============================================================================
// API KEY TYPES
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateApiKeyRequest {
    #[serde(default)]
    pub name: Option<String>,
}

/// A stored key as listed to its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyResponse {
    pub id: i64,
    pub name: String,
    pub key_prefix: String,
    pub created_at: Timestamp,
    pub last_used_at: Option<Timestamp>,
    pub is_active: bool,
}

impl From<ApiKeyRecord> for ApiKeyResponse {
    fn from(record: ApiKeyRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            key_prefix: record.key_prefix,
            created_at: record.created_at,
            last_used_at: record.last_used_at,
            is_active: record.is_active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyListResponse {
    pub success: bool,
    pub keys: Vec<ApiKeyResponse>,
    pub count: usize,
}

/// Response to key creation. The only time `key` is ever sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedApiKeyResponse {
    pub success: bool,
    pub message: String,
    pub key: String,
    pub id: i64,
    pub name: String,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToggleApiKeyRequest {
    #[serde(default)]
    pub is_active: Option<bool>,
}

// ============================================================================
// ACTIVITY TYPES
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityParams {
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityLogEntry {
    pub id: i64,
    pub action: ActionKind,
    pub table_name: Option<String>,
    pub description: String,
    pub metadata: JsonValue,
    pub ip_address: Option<IpAddr>,
    pub source: Source,
    pub created_at: Timestamp,
    /// Human-readable age, relative to the time of the request.
    pub time_ago: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityLogResponse {
    pub logs: Vec<ActivityLogEntry>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}
