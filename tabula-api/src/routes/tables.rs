//! Table REST API Routes
//!
//! Dashboard handlers for listing, creating, describing and dropping the
//! caller's tables.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tabula_storage::TableService;

use crate::{
    error::ApiResult,
    middleware::CurrentRequest,
    types::{CreateTableRequest, CreateTableResponse, MessageResponse},
};

// ============================================================================
// SHARED STATE
// ============================================================================

#[derive(Clone)]
pub struct TableState {
    pub service: TableService,
}

impl TableState {
    pub fn new(service: TableService) -> Self {
        Self { service }
    }
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /api/tables - List the caller's tables with row counts
pub async fn list_tables(
    State(state): State<Arc<TableState>>,
    ctx: CurrentRequest,
) -> ApiResult<impl IntoResponse> {
    let tables = state.service.list_tables(ctx.owner()).await?;
    Ok(Json(tables))
}

/// POST /api/tables - Create a table
pub async fn create_table(
    State(state): State<Arc<TableState>>,
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

/// DELETE /api/tables/:table - Drop a table and its data
pub async fn delete_table(
    State(state): State<Arc<TableState>>,
    ctx: CurrentRequest,
    Path(table): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.service.drop_table(&ctx, &table).await?;
    Ok(Json(MessageResponse::ok(format!("Table \"{}\" deleted", table))))
}

/// GET /api/tables/:table/schema - Columns and row count
pub async fn get_schema(
    State(state): State<Arc<TableState>>,
    ctx: CurrentRequest,
    Path(table): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let schema = state.service.describe_table(ctx.owner(), &table).await?;
    Ok(Json(schema))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(service: TableService) -> Router {
    let state = Arc::new(TableState::new(service));

    Router::new()
        .route("/tables", get(list_tables).post(create_table))
        .route("/tables/:table", axum::routing::delete(delete_table))
        .route("/tables/:table/schema", get(get_schema))
        .with_state(state)
}
