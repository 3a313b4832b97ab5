//! Typed cell values and ordered rows.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::column::ColumnType;
use crate::dialect::Dialect;
use crate::error::ValidationError;

/// Canonical text form for timestamps written to text-typed storage.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const TIMESTAMP_INPUT_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A single cell. The closed set of shapes a user column can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Blob(Vec<u8>),
    Timestamp(NaiveDateTime),
    Boolean(bool),
}

impl Value {
    // ========================================================================
    // COERCION
    // ========================================================================

    /// Coerce a JSON request value to the declared column type.
    pub fn from_json(
        column_type: ColumnType,
        field: &str,
        json: &JsonValue,
    ) -> Result<Value, ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidValue {
            field: field.to_string(),
            reason,
        };

        match json {
            JsonValue::Null => Ok(Value::Null),
            JsonValue::String(s) => Value::from_text(column_type, field, s),
            JsonValue::Bool(b) => match column_type {
                ColumnType::Boolean => Ok(Value::Boolean(*b)),
                ColumnType::Integer => Ok(Value::Integer(i64::from(*b))),
                ColumnType::Text => Ok(Value::Text(b.to_string())),
                other => Err(invalid(format!("expected {}, got a boolean", other))),
            },
            JsonValue::Number(n) => match column_type {
                ColumnType::Integer => n
                    .as_i64()
                    .or_else(|| {
                        n.as_f64()
                            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                            .map(|f| f as i64)
                    })
                    .map(Value::Integer)
                    .ok_or_else(|| invalid(format!("{} is not an integer", n))),
                ColumnType::Real => n
                    .as_f64()
                    .map(Value::Real)
                    .ok_or_else(|| invalid(format!("{} is not a number", n))),
                ColumnType::Boolean => match n.as_i64() {
                    Some(0) => Ok(Value::Boolean(false)),
                    Some(1) => Ok(Value::Boolean(true)),
                    _ => Err(invalid(format!("{} is not a boolean", n))),
                },
                ColumnType::Text => Ok(Value::Text(n.to_string())),
                other => Err(invalid(format!("expected {}, got a number", other))),
            },
            JsonValue::Array(_) | JsonValue::Object(_) => match column_type {
                ColumnType::Text => Ok(Value::Text(json.to_string())),
                other => Err(invalid(format!("expected {}, got a JSON structure", other))),
            },
        }
    }

    /// Coerce a textual value (query string, CSV cell, JSON string).
    pub fn from_text(
        column_type: ColumnType,
        field: &str,
        text: &str,
    ) -> Result<Value, ValidationError> {
        let invalid = |expected: &str| ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("'{}' is not a valid {}", text, expected),
        };

        match column_type {
            ColumnType::Text => Ok(Value::Text(text.to_string())),
            ColumnType::Integer => text
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| invalid("integer")),
            ColumnType::Real => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::Real)
                .ok_or_else(|| invalid("number")),
            ColumnType::Boolean => parse_bool(text)
                .map(Value::Boolean)
                .ok_or_else(|| invalid("boolean")),
            ColumnType::Datetime => parse_timestamp(text)
                .map(Value::Timestamp)
                .ok_or_else(|| invalid("timestamp")),
            ColumnType::Blob => BASE64
                .decode(text.trim())
                .map(Value::Blob)
                .map_err(|_| invalid("base64 blob")),
        }
    }

    /// Normalise a value read back from storage to its declared type.
    ///
    /// SQLite hands booleans back as integers and timestamps as text.
    pub fn conform(self, column_type: ColumnType) -> Value {
        match (column_type, self) {
            (ColumnType::Boolean, Value::Integer(i)) => Value::Boolean(i != 0),
            (ColumnType::Real, Value::Integer(i)) => Value::Real(i as f64),
            (ColumnType::Datetime, Value::Text(s)) => match parse_timestamp(&s) {
                Some(ts) => Value::Timestamp(ts),
                None => Value::Text(s),
            },
            (_, value) => value,
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Boolean(b) => Some(i64::from(*b)),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            Value::Text(s) => parse_bool(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }

    // ========================================================================
    // RENDERING
    // ========================================================================

    /// JSON form used in responses and exports.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Integer(i) => JsonValue::from(*i),
            Value::Real(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Blob(bytes) => JsonValue::String(BASE64.encode(bytes)),
            Value::Timestamp(ts) => JsonValue::String(format_iso(ts)),
            Value::Boolean(b) => JsonValue::Bool(*b),
        }
    }

    /// Plain text form used for CSV cells and row identifiers.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Real(f) => f.to_string(),
            Value::Blob(bytes) => BASE64.encode(bytes),
            Value::Timestamp(ts) => format_iso(ts),
            Value::Boolean(b) => b.to_string(),
        }
    }

    /// SQL literal for DDL `DEFAULT` clauses, the one place a value is
    /// written into statement text because DDL takes no parameters.
    pub fn sql_literal<D: Dialect + ?Sized>(&self, dialect: &D) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Text(s) => quote_literal(s),
            Value::Integer(i) => i.to_string(),
            Value::Real(f) if f.is_finite() => format!("{:?}", f),
            Value::Real(_) => "NULL".to_string(),
            Value::Blob(bytes) => dialect.blob_literal(bytes),
            Value::Timestamp(ts) => quote_literal(&ts.format(TIMESTAMP_FORMAT).to_string()),
            Value::Boolean(b) => dialect.boolean_literal(*b).to_string(),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Real(f) if f.is_finite() => serializer.serialize_f64(*f),
            Value::Real(_) => serializer.serialize_none(),
            Value::Blob(bytes) => serializer.serialize_str(&BASE64.encode(bytes)),
            Value::Timestamp(ts) => serializer.serialize_str(&format_iso(ts)),
            Value::Boolean(b) => serializer.serialize_bool(*b),
        }
    }
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn format_iso(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "f" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Parse the timestamp shapes accepted from callers and stored by SQLite.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    TIMESTAMP_INPUT_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

// ============================================================================
// ROW
// ============================================================================

/// An ordered column-name to value mapping.
///
/// Serialises as a JSON object whose keys follow the stored column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    entries: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// JSON object form, keeping only the named columns.
    pub fn to_json_object(&self, columns: &[&str]) -> serde_json::Map<String, JsonValue> {
        self.entries
            .iter()
            .filter(|(k, _)| columns.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use serde_json::json;

    #[test]
    fn test_from_json_integer() -> Result<(), ValidationError> {
        assert_eq!(
            Value::from_json(ColumnType::Integer, "qty", &json!(5))?,
            Value::Integer(5)
        );
        assert_eq!(
            Value::from_json(ColumnType::Integer, "qty", &json!("12"))?,
            Value::Integer(12)
        );
        assert_eq!(
            Value::from_json(ColumnType::Integer, "qty", &json!(3.0))?,
            Value::Integer(3)
        );
        assert!(Value::from_json(ColumnType::Integer, "qty", &json!(3.5)).is_err());
        Ok(())
    }

    #[test]
    fn test_from_json_boolean_variants() -> Result<(), ValidationError> {
        assert_eq!(
            Value::from_json(ColumnType::Boolean, "ok", &json!(true))?,
            Value::Boolean(true)
        );
        assert_eq!(
            Value::from_json(ColumnType::Boolean, "ok", &json!(0))?,
            Value::Boolean(false)
        );
        assert_eq!(
            Value::from_json(ColumnType::Boolean, "ok", &json!("yes"))?,
            Value::Boolean(true)
        );
        assert!(Value::from_json(ColumnType::Boolean, "ok", &json!(2)).is_err());
        Ok(())
    }

    #[test]
    fn test_from_text_timestamp_shapes() {
        for text in [
            "2024-03-01T10:20:30Z",
            "2024-03-01T10:20:30.500",
            "2024-03-01 10:20:30",
            "2024-03-01",
        ] {
            assert!(
                Value::from_text(ColumnType::Datetime, "at", text).is_ok(),
                "{text}"
            );
        }
        assert!(Value::from_text(ColumnType::Datetime, "at", "yesterday").is_err());
    }

    #[test]
    fn test_blob_round_trips_through_base64() -> Result<(), ValidationError> {
        let blob = Value::Blob(vec![0, 1, 2, 255]);
        let json = blob.to_json();
        assert_eq!(Value::from_json(ColumnType::Blob, "data", &json)?, blob);
        Ok(())
    }

    #[test]
    fn test_conform_sqlite_representations() {
        assert_eq!(
            Value::Integer(1).conform(ColumnType::Boolean),
            Value::Boolean(true)
        );
        let ts = Value::Text("2024-01-02 03:04:05".to_string()).conform(ColumnType::Datetime);
        assert!(matches!(ts, Value::Timestamp(_)));
        assert_eq!(
            Value::Text("abc".to_string()).conform(ColumnType::Integer),
            Value::Text("abc".to_string())
        );
    }

    #[test]
    fn test_sql_literal_escapes_quotes() {
        let value = Value::Text("O'Brien".to_string());
        assert_eq!(value.sql_literal(&SqliteDialect), "'O''Brien'");
        assert_eq!(Value::Boolean(true).sql_literal(&SqliteDialect), "1");
        assert_eq!(Value::Boolean(true).sql_literal(&PostgresDialect), "TRUE");
        assert_eq!(Value::Real(2.0).sql_literal(&SqliteDialect), "2.0");
    }

    #[test]
    fn test_row_serializes_in_order() -> Result<(), serde_json::Error> {
        let mut row = Row::new();
        row.push("zeta", Value::Integer(1));
        row.push("alpha", Value::Text("a".to_string()));
        row.push("empty", Value::Null);

        let text = serde_json::to_string(&row)?;
        assert_eq!(text, r#"{"zeta":1,"alpha":"a","empty":null}"#);
        Ok(())
    }
}
