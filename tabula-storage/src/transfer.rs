//! Bulk export and import.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use tabula_core::{ColumnDescriptor, Row, TableDescriptor, TabulaResult, Timestamp, ValidationError};
use tracing::{debug, info};

use crate::rows::RowEngine;

/// Import errors reported back in full; the rest are only counted.
pub const MAX_REPORTED_ERRORS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferFormat {
    #[default]
    Json,
    Csv,
}

impl TransferFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferFormat::Json => "json",
            TransferFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for TransferFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(TransferFormat::Json),
            "csv" => Ok(TransferFormat::Csv),
            other => Err(ValidationError::InvalidValue {
                field: "format".to_string(),
                reason: format!("unsupported format '{}', expected json or csv", other),
            }),
        }
    }
}

// ============================================================================
// EXPORT
// ============================================================================

/// A full snapshot of one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportDocument {
    pub table_name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub exported_at: Timestamp,
}

impl ExportDocument {
    /// CSV text with a header row in declared column order.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        let header: Vec<String> = self.columns.iter().map(|c| csv_escape(&c.name)).collect();
        out.push_str(&header.join(","));
        out.push('\n');

        for row in &self.rows {
            let cells: Vec<String> = self
                .columns
                .iter()
                .map(|c| row.get(&c.name).map(|v| csv_escape(&v.to_text())).unwrap_or_default())
                .collect();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
        out
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub async fn export(rows: &RowEngine, table: &TableDescriptor) -> TabulaResult<ExportDocument> {
    let all = rows.all(table).await?;
    debug!(table = %table.name, rows = all.len(), "table exported");
    Ok(ExportDocument {
        table_name: table.name.clone(),
        columns: table.columns.clone(),
        row_count: all.len(),
        rows: all,
        exported_at: Utc::now(),
    })
}

// ============================================================================
// IMPORT
// ============================================================================

/// Outcome of an import. Partial success is success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: u64,
    /// The first few per-row messages, `Row {n}: ...`, 1-based.
    pub errors: Vec<String>,
    pub total_errors: usize,
}

impl ImportReport {
    fn push_error(&mut self, message: String) {
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(message);
        }
        self.total_errors += 1;
    }
}

/// Insert each object of `data` as one row. Rows fail independently.
pub async fn import(
    rows: &RowEngine,
    table: &TableDescriptor,
    data: &[JsonValue],
) -> TabulaResult<ImportReport> {
    if data.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "data".to_string(),
        }
        .into());
    }

    let mut report = ImportReport {
        imported: 0,
        errors: Vec::new(),
        total_errors: 0,
    };
    for (index, item) in data.iter().enumerate() {
        let number = index + 1;
        let Some(object) = item.as_object() else {
            report.push_error(format!("Row {}: Not a valid object", number));
            continue;
        };
        match rows.insert(table, object).await {
            Ok(_) => report.imported += 1,
            Err(e) => report.push_error(format!("Row {}: {}", number, e)),
        }
    }

    info!(
        table = %table.name,
        imported = report.imported,
        errors = report.total_errors,
        "import finished"
    );
    Ok(report)
}
