//! Column REST API Routes
//!
//! Add, rename and drop columns of an existing table. Shared by the
//! dashboard and the programmatic surface; only the authentication in front
//! of the router differs.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use std::sync::Arc;
use tabula_storage::TableService;

use crate::{
    error::ApiResult,
    middleware::CurrentRequest,
    types::{AddColumnRequest, DropColumnRequest, MessageResponse, RenameColumnRequest},
};

#[derive(Clone)]
pub struct ColumnState {
    pub service: TableService,
}

impl ColumnState {
    pub fn new(service: TableService) -> Self {
        Self { service }
    }
}

/// POST /tables/:table/columns - Add a column
pub async fn add_column(
    State(state): State<Arc<ColumnState>>,
    ctx: CurrentRequest,
    Path(table): Path<String>,
    Json(req): Json<AddColumnRequest>,
) -> ApiResult<impl IntoResponse> {
    let column = req.into_descriptor()?;
    let name = column.name.clone();
    state.service.add_column(&ctx, &table, column).await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::ok(format!("Column \"{}\" added", name))),
    ))
}

/// PUT /tables/:table/columns - Rename a column
pub async fn rename_column(
    State(state): State<Arc<ColumnState>>,
    ctx: CurrentRequest,
    Path(table): Path<String>,
    Json(req): Json<RenameColumnRequest>,
) -> ApiResult<impl IntoResponse> {
    let (old_name, new_name) = req.names()?;
    state
        .service
        .rename_column(&ctx, &table, old_name, new_name)
        .await?;

    Ok(Json(MessageResponse::ok(format!(
        "Column renamed from \"{}\" to \"{}\"",
        old_name, new_name
    ))))
}

/// DELETE /tables/:table/columns - Drop a column
pub async fn drop_column(
    State(state): State<Arc<ColumnState>>,
    ctx: CurrentRequest,
    Path(table): Path<String>,
    Json(req): Json<DropColumnRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = req.name()?;
    state.service.drop_column(&ctx, &table, name).await?;

    Ok(Json(MessageResponse::ok(format!("Column \"{}\" deleted", name))))
}

pub fn create_router(service: TableService) -> Router {
    let state = Arc::new(ColumnState::new(service));

    Router::new()
        .route(
            "/tables/:table/columns",
            post(add_column).put(rename_column).delete(drop_column),
        )
        .with_state(state)
}
