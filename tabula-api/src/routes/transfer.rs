//! Export/Import REST API Routes

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tabula_storage::{TableService, TransferFormat};

use crate::{
    error::{ApiError, ApiResult},
    middleware::CurrentRequest,
    types::{ExportParams, ImportRequest, ImportResponse},
};

#[derive(Clone)]
pub struct TransferState {
    pub service: TableService,
}

impl TransferState {
    pub fn new(service: TableService) -> Self {
        Self { service }
    }
}

fn parse_format(raw: Option<&str>) -> ApiResult<TransferFormat> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => Ok(raw.parse()?),
        _ => Ok(TransferFormat::Json),
    }
}

fn attachment(table: &str, extension: &str) -> String {
    format!("attachment; filename=\"{}.{}\"", table, extension)
}

/// GET /api/tables/:table/export?format=json|csv - Download every row
pub async fn export_table(
    State(state): State<Arc<TransferState>>,
    ctx: CurrentRequest,
    Path(table): Path<String>,
    Query(params): Query<ExportParams>,
) -> ApiResult<Response> {
    let format = parse_format(params.format.as_deref())?;
    let document = state.service.export(&ctx, &table, format).await?;

    let response = match format {
        TransferFormat::Csv => (
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (header::CONTENT_DISPOSITION, attachment(&document.table_name, "csv")),
            ],
            document.to_csv(),
        )
            .into_response(),
        TransferFormat::Json => (
            [(
                header::CONTENT_DISPOSITION,
                attachment(&document.table_name, "json"),
            )],
            Json(document),
        )
            .into_response(),
    };
    Ok(response)
}

/// POST /api/tables/:table/import - Insert a list of rows
///
/// Rows fail independently. 201 when at least one row went in, 400 otherwise;
/// the body carries the report either way.
pub async fn import_table(
    State(state): State<Arc<TransferState>>,
    ctx: CurrentRequest,
    Path(table): Path<String>,
    Json(req): Json<ImportRequest>,
) -> ApiResult<impl IntoResponse> {
    let format = parse_format(req.format.as_deref())?;

    let rows = match req.data {
        None | Some(serde_json::Value::Null) => {
            return Err(ApiError::validation_failed("No data provided"))
        }
        Some(serde_json::Value::Array(rows)) if rows.is_empty() => {
            return Err(ApiError::validation_failed("No data provided"))
        }
        Some(serde_json::Value::Array(rows)) => rows,
        Some(_) => return Err(ApiError::validation_failed("Data must be a list of rows")),
    };

    let report = state.service.import(&ctx, &table, format, &rows).await?;
    let status = if report.imported > 0 {
        StatusCode::CREATED
    } else {
        StatusCode::BAD_REQUEST
    };

    Ok((
        status,
        Json(ImportResponse {
            success: report.imported > 0,
            imported: report.imported,
            errors: report.errors,
            total_errors: report.total_errors,
        }),
    ))
}

pub fn create_router(service: TableService) -> Router {
    let state = Arc::new(TransferState::new(service));

    Router::new()
        .route("/tables/:table/export", get(export_table))
        .route("/tables/:table/import", post(import_table))
        .with_state(state)
}
