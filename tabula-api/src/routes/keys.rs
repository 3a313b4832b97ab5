//! API Key REST API Routes
//!
//! Key management for signed-in dashboard users. Requests authenticated
//! with an API key are refused with 403.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};
use std::sync::Arc;
use tabula_storage::TableService;

use crate::{
    error::{ApiError, ApiResult},
    middleware::{require_session, CurrentRequest},
    types::{
        ApiKeyListResponse, ApiKeyResponse, CreateApiKeyRequest, CreatedApiKeyResponse,
        MessageResponse, ToggleApiKeyRequest,
    },
};

#[derive(Clone)]
pub struct KeyState {
    pub service: TableService,
}

impl KeyState {
    pub fn new(service: TableService) -> Self {
        Self { service }
    }
}

/// GET /api/keys - List the caller's keys, newest first
pub async fn list_keys(
    State(state): State<Arc<KeyState>>,
    ctx: CurrentRequest,
) -> ApiResult<impl IntoResponse> {
    require_session(&ctx)?;
    let keys: Vec<ApiKeyResponse> = state
        .service
        .api_keys()
        .list(ctx.owner())
        .await?
        .into_iter()
        .map(ApiKeyResponse::from)
        .collect();

    Ok(Json(ApiKeyListResponse {
        success: true,
        count: keys.len(),
        keys,
    }))
}

/// POST /api/keys - Issue a key; the raw value is returned once
pub async fn create_key(
    State(state): State<Arc<KeyState>>,
    ctx: CurrentRequest,
    Json(req): Json<CreateApiKeyRequest>,
) -> ApiResult<impl IntoResponse> {
    require_session(&ctx)?;
    let name = req.name.as_deref().map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(ApiError::validation_failed("Key name is required"));
    }

    let issued = state.service.api_keys().create(ctx.owner(), name).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedApiKeyResponse {
            success: true,
            message: "API key created. Copy it now - it will not be shown again!".to_string(),
            key: issued.raw_key,
            id: issued.record.id,
            name: issued.record.name,
            key_prefix: issued.record.key_prefix,
        }),
    ))
}

/// DELETE /api/keys/:key_id - Revoke a key
pub async fn delete_key(
    State(state): State<Arc<KeyState>>,
    ctx: CurrentRequest,
    Path(key_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    require_session(&ctx)?;
    state.service.api_keys().delete(ctx.owner(), key_id).await?;
    Ok(Json(MessageResponse::ok("API key deleted")))
}

/// PATCH /api/keys/:key_id - Activate or deactivate a key
pub async fn toggle_key(
    State(state): State<Arc<KeyState>>,
    ctx: CurrentRequest,
    Path(key_id): Path<i64>,
    Json(req): Json<ToggleApiKeyRequest>,
) -> ApiResult<impl IntoResponse> {
    require_session(&ctx)?;
    let is_active = req
        .is_active
        .ok_or_else(|| ApiError::missing_field("is_active"))?;
    state
        .service
        .api_keys()
        .set_active(ctx.owner(), key_id, is_active)
        .await?;

    Ok(Json(MessageResponse::ok(format!(
        "API key {}",
        if is_active { "activated" } else { "deactivated" }
    ))))
}

pub fn create_router(service: TableService) -> Router {
    let state = Arc::new(KeyState::new(service));

    Router::new()
        .route("/keys", get(list_keys).post(create_key))
        .route("/keys/:key_id", patch(toggle_key).delete(delete_key))
        .with_state(state)
}
