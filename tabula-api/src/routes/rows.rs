//! Row REST API Routes
//!
//! Dashboard handlers for paging through, inserting, updating and deleting
//! rows of one table. The list endpoint takes its filters straight from the
//! query string: `page`, `page_size`/`limit`, `offset`, `search`, `sort`,
//! `order`, and any `<column>` or `<column>__<op>` pair.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tabula_core::{RowQuery, Value};
use tabula_storage::TableService;

use crate::{
    error::ApiResult,
    middleware::CurrentRequest,
    types::{InsertRowResponse, RowListResponse, RowMutationResponse},
};

// ============================================================================
// SHARED STATE
// ============================================================================

#[derive(Clone)]
pub struct RowState {
    pub service: TableService,
}

impl RowState {
    pub fn new(service: TableService) -> Self {
        Self { service }
    }
}

/// JSON form of an engine-reported row identifier.
pub(crate) fn id_to_json(id: Option<Value>) -> JsonValue {
    id.map(|v| v.to_json()).unwrap_or(JsonValue::Null)
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /api/tables/:table/rows - One page of rows
pub async fn list_rows(
    State(state): State<Arc<RowState>>,
    ctx: CurrentRequest,
    Path(table): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<impl IntoResponse> {
    let query = RowQuery::from_params(params);
    let listing = state.service.list_rows(ctx.owner(), &table, &query).await?;
    let page = listing.page;

    Ok(Json(RowListResponse {
        rows: page.rows,
        total: page.total,
        page: page.page,
        page_size: page.limit,
        total_pages: page.total_pages,
    }))
}

/// POST /api/tables/:table/rows - Insert one row
pub async fn insert_row(
    State(state): State<Arc<RowState>>,
    ctx: CurrentRequest,
    Path(table): Path<String>,
    Json(data): Json<Map<String, JsonValue>>,
) -> ApiResult<impl IntoResponse> {
    let id = state.service.insert_row(&ctx, &table, &data).await?;

    Ok((
        StatusCode::CREATED,
        Json(InsertRowResponse {
            success: true,
            message: "Row inserted".to_string(),
            id: id_to_json(id),
        }),
    ))
}

/// PUT /api/tables/:table/rows/:row_id - Update one row
pub async fn update_row(
    State(state): State<Arc<RowState>>,
    ctx: CurrentRequest,
    Path((table, row_id)): Path<(String, String)>,
    Json(data): Json<Map<String, JsonValue>>,
) -> ApiResult<impl IntoResponse> {
    let affected = state.service.update_row(&ctx, &table, &row_id, &data).await?;

    Ok(Json(RowMutationResponse {
        success: true,
        message: "Row updated".to_string(),
        affected,
    }))
}

/// DELETE /api/tables/:table/rows/:row_id - Delete one row
pub async fn delete_row(
    State(state): State<Arc<RowState>>,
    ctx: CurrentRequest,
    Path((table, row_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let affected = state.service.delete_row(&ctx, &table, &row_id).await?;

    Ok(Json(RowMutationResponse {
        success: true,
        message: format!("Row deleted ({} rows affected)", affected),
        affected,
    }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(service: TableService) -> Router {
    let state = Arc::new(RowState::new(service));

    Router::new()
        .route("/tables/:table/rows", get(list_rows).post(insert_row))
        .route("/tables/:table/rows/:row_id", put(update_row).delete(delete_row))
        .with_state(state)
}
