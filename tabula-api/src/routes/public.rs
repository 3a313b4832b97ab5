//! Programmatic REST API Routes (`/api/v1`)
//!
//! API-key clients get the same resources as the dashboard under a stable,
//! versioned prefix. Responses carry a `success` flag, and single-row
//! updates and deletes that match nothing are reported as 404.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tabula_core::RowQuery;
use tabula_storage::TableService;

use crate::{
    error::{ApiError, ApiResult},
    middleware::CurrentRequest,
    routes::{columns, rows::id_to_json},
    types::{
        CreateTableRequest, CreateTableResponse, InsertRowResponse, MessageResponse,
        PublicRowListResponse, PublicTableDetailResponse, PublicTableListResponse,
        PublicTableSummary, RowResponse,
    },
};

#[derive(Clone)]
pub struct PublicState {
    pub service: TableService,
}

impl PublicState {
    pub fn new(service: TableService) -> Self {
        Self { service }
    }
}

// ============================================================================
// TABLES
// ============================================================================

/// GET /api/v1/tables
pub async fn list_tables(
    State(state): State<Arc<PublicState>>,
    ctx: CurrentRequest,
) -> ApiResult<impl IntoResponse> {
    let tables: Vec<PublicTableSummary> = state
        .service
        .list_tables(ctx.owner())
        .await?
        .into_iter()
        .map(|t| PublicTableSummary {
            name: t.name,
            row_count: t.row_count,
            created_at: t.created_at,
        })
        .collect();

    Ok(Json(PublicTableListResponse {
        success: true,
        count: tables.len(),
        tables,
    }))
}

/// POST /api/v1/tables
pub async fn create_table(
    State(state): State<Arc<PublicState>>,
    ctx: CurrentRequest,
    Json(req): Json<CreateTableRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = req.table_name()?.to_string();
    let table = state.service.create_table(&ctx, &name, req.columns).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateTableResponse {
            success: true,
            message: format!("Table \"{}\" created successfully", table.name),
            table_name: table.name,
        }),
    ))
}

/// GET /api/v1/tables/:table
pub async fn get_table(
    State(state): State<Arc<PublicState>>,
    ctx: CurrentRequest,
    Path(table): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let descriptor = state.service.table(ctx.owner(), &table).await?;
    let schema = state.service.describe_table(ctx.owner(), &table).await?;

    Ok(Json(PublicTableDetailResponse {
        success: true,
        name: descriptor.name,
        columns: schema.columns,
        row_count: schema.row_count,
        created_at: descriptor.created_at,
    }))
}

// ============================================================================
// ROWS
// ============================================================================

/// GET /api/v1/tables/:table/rows
pub async fn list_rows(
    State(state): State<Arc<PublicState>>,
    ctx: CurrentRequest,
    Path(table): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<impl IntoResponse> {
    let query = RowQuery::from_params(params);
    let page = state
        .service
        .list_rows(ctx.owner(), &table, &query)
        .await?
        .page;

    Ok(Json(PublicRowListResponse {
        success: true,
        rows: page.rows,
        total: page.total,
        page: page.page,
        limit: page.limit,
        total_pages: page.total_pages,
    }))
}

/// POST /api/v1/tables/:table/rows
pub async fn insert_row(
    State(state): State<Arc<PublicState>>,
    ctx: CurrentRequest,
    Path(table): Path<String>,
    Json(data): Json<Map<String, JsonValue>>,
) -> ApiResult<impl IntoResponse> {
    if data.is_empty() {
        return Err(ApiError::validation_failed("Request body is empty"));
    }
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

/// GET /api/v1/tables/:table/rows/:row_id
pub async fn get_row(
    State(state): State<Arc<PublicState>>,
    ctx: CurrentRequest,
    Path((table, row_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let row = state.service.get_row(ctx.owner(), &table, &row_id).await?;
    Ok(Json(RowResponse { success: true, row }))
}

/// PUT /api/v1/tables/:table/rows/:row_id
pub async fn update_row(
    State(state): State<Arc<PublicState>>,
    ctx: CurrentRequest,
    Path((table, row_id)): Path<(String, String)>,
    Json(data): Json<Map<String, JsonValue>>,
) -> ApiResult<impl IntoResponse> {
    let affected = state.service.update_row(&ctx, &table, &row_id, &data).await?;
    if affected == 0 {
        return Err(ApiError::row_not_found());
    }
    Ok(Json(MessageResponse::ok("Row updated")))
}

/// DELETE /api/v1/tables/:table/rows/:row_id
pub async fn delete_row(
    State(state): State<Arc<PublicState>>,
    ctx: CurrentRequest,
    Path((table, row_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let affected = state.service.delete_row(&ctx, &table, &row_id).await?;
    if affected == 0 {
        return Err(ApiError::row_not_found());
    }
    Ok(Json(MessageResponse::ok("Row deleted")))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(service: TableService) -> Router {
    let state = Arc::new(PublicState::new(service.clone()));

    Router::new()
        .route("/tables", get(list_tables).post(create_table))
        .route("/tables/:table", get(get_table))
        .route("/tables/:table/rows", get(list_rows).post(insert_row))
        .route(
            "/tables/:table/rows/:row_id",
            get(get_row).put(update_row).delete(delete_row),
        )
        .with_state(state)
        .merge(columns::create_router(service))
}
