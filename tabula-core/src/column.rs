//! Column and table descriptors.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{IdentifierKind, ValidationError};
use crate::identifier::{self, MAX_IDENTIFIER_LEN};
use crate::principal::OwnerId;
use crate::value::Value;
use crate::Timestamp;

// ============================================================================
// COLUMN TYPE
// ============================================================================

/// Logical column type. Each dialect maps it to a native type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Blob,
    Datetime,
    Boolean,
}

impl ColumnType {
    pub const ALL: [ColumnType; 6] = [
        ColumnType::Text,
        ColumnType::Integer,
        ColumnType::Real,
        ColumnType::Blob,
        ColumnType::Datetime,
        ColumnType::Boolean,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Blob => "BLOB",
            ColumnType::Datetime => "DATETIME",
            ColumnType::Boolean => "BOOLEAN",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ColumnType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::InvalidValue {
                field: "type".to_string(),
                reason: format!(
                    "unknown column type '{}', expected one of TEXT, INTEGER, REAL, BLOB, DATETIME, BOOLEAN",
                    s
                ),
            })
    }
}

impl TryFrom<String> for ColumnType {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ============================================================================
// COLUMN DESCRIPTOR
// ============================================================================

/// One column of a user table, as stored in the schema document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub pk: bool,
    #[serde(default)]
    pub notnull: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub dflt_value: Option<JsonValue>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            pk: false,
            notnull: false,
            unique: false,
            dflt_value: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.pk = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.notnull = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self, value: JsonValue) -> Self {
        self.dflt_value = Some(value);
        self
    }

    /// The declared default, coerced to the column type.
    pub fn default_value(&self) -> Result<Option<Value>, ValidationError> {
        match &self.dflt_value {
            None | Some(JsonValue::Null) => Ok(None),
            Some(json) => Value::from_json(self.column_type, &self.name, json).map(Some),
        }
    }
}

/// Check the invariants of a complete column list.
///
/// At least one column, valid and unique names (case-insensitively), at most
/// one primary key and defaults that fit their column type.
pub fn validate_column_list(columns: &[ColumnDescriptor]) -> Result<(), ValidationError> {
    if columns.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "columns".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for column in columns {
        identifier::validate(IdentifierKind::Column, &column.name)?;
        if !seen.insert(column.name.to_ascii_lowercase()) {
            return Err(ValidationError::DuplicateColumn {
                name: column.name.clone(),
            });
        }
        column.default_value()?;
    }

    if columns.iter().filter(|c| c.pk).count() > 1 {
        return Err(ValidationError::MultiplePrimaryKeys);
    }

    Ok(())
}

// ============================================================================
// TABLE DESCRIPTOR
// ============================================================================

/// A logical table and its physical counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub owner: OwnerId,
    pub name: String,
    pub physical_name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub created_at: Timestamp,
}

impl TableDescriptor {
    /// Build a descriptor for a new table, deriving its physical name.
    pub fn new(
        owner: OwnerId,
        name: &str,
        columns: Vec<ColumnDescriptor>,
        created_at: Timestamp,
    ) -> Result<Self, ValidationError> {
        let physical_name = physical_table_name(owner, name)?;
        Ok(Self {
            owner,
            name: name.to_string(),
            physical_name,
            columns,
            created_at,
        })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column lookup that also matches names differing only in case.
    pub fn column_loose(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.column(name).or_else(|| {
            self.columns
                .iter()
                .find(|c| identifier::same_identifier(&c.name, name))
        })
    }

    pub fn primary_key(&self) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.pk)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Derive the engine-level table name: `u<owner>_<logical>`.
pub fn physical_table_name(owner: OwnerId, logical: &str) -> Result<String, ValidationError> {
    identifier::validate(IdentifierKind::Table, logical)?;
    let prefix = format!("u{}_", owner);
    let room = MAX_IDENTIFIER_LEN.saturating_sub(prefix.len());
    if logical.len() > room {
        return Err(ValidationError::InvalidIdentifier {
            kind: IdentifierKind::Table,
            name: logical.to_string(),
            reason: format!("name is too long (at most {} characters for this account)", room),
        });
    }
    let physical = format!("{}{}", prefix, logical);
    identifier::validate(IdentifierKind::Physical, &physical)?;
    Ok(physical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_columns() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("id", ColumnType::Integer).primary_key(),
            ColumnDescriptor::new("name", ColumnType::Text).not_null(),
            ColumnDescriptor::new("price", ColumnType::Real),
        ]
    }

    #[test]
    fn test_column_type_parse_is_case_insensitive() -> Result<(), ValidationError> {
        assert_eq!("integer".parse::<ColumnType>()?, ColumnType::Integer);
        assert_eq!("DateTime".parse::<ColumnType>()?, ColumnType::Datetime);
        assert!("VARCHAR".parse::<ColumnType>().is_err());
        Ok(())
    }

    #[test]
    fn test_column_descriptor_json_shape() -> Result<(), serde_json::Error> {
        let column: ColumnDescriptor =
            serde_json::from_value(json!({"name": "qty", "type": "integer", "notnull": true}))?;
        assert_eq!(column.column_type, ColumnType::Integer);
        assert!(column.notnull);
        assert!(!column.pk);
        assert_eq!(column.dflt_value, None);

        let out = serde_json::to_value(&column)?;
        assert_eq!(out["type"], "INTEGER");
        assert_eq!(out["dflt_value"], JsonValue::Null);
        Ok(())
    }

    #[test]
    fn test_validate_column_list_accepts_sample() {
        assert!(validate_column_list(&sample_columns()).is_ok());
    }

    #[test]
    fn test_validate_column_list_rejects_empty() {
        assert!(matches!(
            validate_column_list(&[]),
            Err(ValidationError::RequiredFieldMissing { .. })
        ));
    }

    #[test]
    fn test_validate_column_list_rejects_two_primary_keys() {
        let mut columns = sample_columns();
        columns[1].pk = true;
        assert_eq!(
            validate_column_list(&columns),
            Err(ValidationError::MultiplePrimaryKeys)
        );
    }

    #[test]
    fn test_validate_column_list_rejects_case_duplicates() {
        let mut columns = sample_columns();
        columns.push(ColumnDescriptor::new("NAME", ColumnType::Text));
        assert!(matches!(
            validate_column_list(&columns),
            Err(ValidationError::DuplicateColumn { .. })
        ));
    }

    #[test]
    fn test_validate_column_list_rejects_bad_default() {
        let columns = vec![ColumnDescriptor::new("qty", ColumnType::Integer).with_default(json!("many"))];
        assert!(matches!(
            validate_column_list(&columns),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_physical_table_name() -> Result<(), ValidationError> {
        assert_eq!(physical_table_name(OwnerId(12), "products")?, "u12_products");
        assert!(physical_table_name(OwnerId(1), "bad-name").is_err());
        Ok(())
    }

    #[test]
    fn test_physical_name_limit_follows_owner_id() -> Result<(), ValidationError> {
        let longest = "t".repeat(identifier::MAX_TABLE_NAME_LEN);
        assert_eq!(physical_table_name(OwnerId(99_999_999_999), &longest)?.len(), 63);

        let big_owner = OwnerId(123_456_789_012_345);
        let err = physical_table_name(big_owner, &longest).unwrap_err();
        assert!(err.to_string().contains("at most 46 characters"));
        assert!(physical_table_name(big_owner, &"t".repeat(46)).is_ok());
        Ok(())
    }
}
