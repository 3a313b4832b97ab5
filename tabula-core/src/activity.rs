//! Activity records emitted by every successful mutation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::principal::{OwnerId, RequestContext, Source};
use crate::Timestamp;

/// Kind of mutation recorded in the activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    CreateTable,
    DeleteTable,
    AddColumn,
    RenameColumn,
    DeleteColumn,
    InsertRow,
    UpdateRow,
    DeleteRow,
    ExportData,
    ImportData,
}

impl ActionKind {
    pub const ALL: [ActionKind; 10] = [
        ActionKind::CreateTable,
        ActionKind::DeleteTable,
        ActionKind::AddColumn,
        ActionKind::RenameColumn,
        ActionKind::DeleteColumn,
        ActionKind::InsertRow,
        ActionKind::UpdateRow,
        ActionKind::DeleteRow,
        ActionKind::ExportData,
        ActionKind::ImportData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::CreateTable => "CREATE_TABLE",
            ActionKind::DeleteTable => "DELETE_TABLE",
            ActionKind::AddColumn => "ADD_COLUMN",
            ActionKind::RenameColumn => "RENAME_COLUMN",
            ActionKind::DeleteColumn => "DELETE_COLUMN",
            ActionKind::InsertRow => "INSERT_ROW",
            ActionKind::UpdateRow => "UPDATE_ROW",
            ActionKind::DeleteRow => "DELETE_ROW",
            ActionKind::ExportData => "EXPORT_DATA",
            ActionKind::ImportData => "IMPORT_DATA",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::InvalidValue {
                field: "action".to_string(),
                reason: format!("unknown action '{}'", s),
            })
    }
}

/// One append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub owner: OwnerId,
    pub action: ActionKind,
    pub table_name: Option<String>,
    pub description: String,
    pub metadata: JsonValue,
    pub ip_address: Option<IpAddr>,
    pub source: Source,
    pub created_at: Timestamp,
}

impl ActivityRecord {
    /// Start a record for `ctx`. API-key principals get `source` and
    /// `api_key_name` stamped into the metadata.
    pub fn new(
        ctx: &RequestContext,
        action: ActionKind,
        table_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let mut metadata = Map::new();
        if ctx.principal.source == Source::Api {
            metadata.insert("source".to_string(), json!(Source::Api.as_str()));
            if let Some(name) = &ctx.principal.api_key_name {
                metadata.insert("api_key_name".to_string(), json!(name));
            }
        }

        Self {
            owner: ctx.owner(),
            action,
            table_name: Some(table_name.into()),
            description: description.into(),
            metadata: JsonValue::Object(metadata),
            ip_address: ctx.ip_address,
            source: ctx.principal.source,
            created_at: chrono::Utc::now(),
        }
    }

    /// Merge the fields of a JSON object into the metadata.
    pub fn with_metadata(mut self, extra: JsonValue) -> Self {
        if let (JsonValue::Object(target), JsonValue::Object(extra)) = (&mut self.metadata, extra) {
            target.extend(extra);
        }
        self
    }
}
