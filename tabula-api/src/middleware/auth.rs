//! Axum Middleware for Authentication
//!
//! Resolves the caller before any handler runs and injects a
//! [`RequestContext`] into the request extensions:
//! - `session_auth_middleware` serves the dashboard. An `X-API-Key` header
//!   wins when present and must be valid; otherwise a Bearer session token
//!   is required.
//! - `api_key_middleware` serves `/api/v1` and accepts API keys only.
//!
//! A present but invalid credential is always a 401. It never falls through
//! to the next mechanism.

use crate::auth::{authenticate_session, AuthConfig};
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tabula_core::{Principal, RequestContext, Source};
use tabula_storage::TableService;
use tracing::debug;

/// Header carrying a raw `sk_` key.
pub const API_KEY_HEADER: &str = "x-api-key";

// ============================================================================
// MIDDLEWARE STATE
// ============================================================================

/// Shared state for the authentication middleware.
#[derive(Clone)]
pub struct AuthMiddlewareState {
    pub auth_config: Arc<AuthConfig>,

    /// Key lookups go through the storage-backed key store.
    pub service: TableService,
}

impl AuthMiddlewareState {
    pub fn new(auth_config: Arc<AuthConfig>, service: TableService) -> Self {
        Self {
            auth_config,
            service,
        }
    }

    async fn authenticate_api_key(&self, raw_key: &str) -> Result<Principal, AuthMiddlewareError> {
        self.service
            .api_keys()
            .authenticate(raw_key.trim())
            .await
            .map_err(|e| AuthMiddlewareError(e.into()))
    }
}

// ============================================================================
// MIDDLEWARE FUNCTIONS
// ============================================================================

/// Dashboard authentication: API key if supplied, session token otherwise.
pub async fn session_auth_middleware(
    State(state): State<AuthMiddlewareState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    let api_key_header = header_str(&request, API_KEY_HEADER)?;
    let auth_header = header_str(&request, "authorization")?;

    let principal = if let Some(raw_key) = api_key_header {
        state.authenticate_api_key(&raw_key).await?
    } else if let Some(auth_value) = auth_header {
        authenticate_session(&state.auth_config, &auth_value).map_err(AuthMiddlewareError)?
    } else {
        return Err(AuthMiddlewareError(ApiError::unauthorized(
            "Authentication required: provide X-API-Key or Authorization header",
        )));
    };

    inject_context(&mut request, principal);
    Ok(next.run(request).await)
}

/// Programmatic surface authentication: `X-API-Key` is mandatory.
pub async fn api_key_middleware(
    State(state): State<AuthMiddlewareState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    let raw_key = header_str(&request, API_KEY_HEADER)?.ok_or_else(|| {
        AuthMiddlewareError(ApiError::unauthorized(
            "API key required: provide the X-API-Key header",
        ))
    })?;

    let principal = state.authenticate_api_key(&raw_key).await?;
    inject_context(&mut request, principal);
    Ok(next.run(request).await)
}

/// A credential header that is present but unreadable fails authentication
/// rather than counting as absent.
fn header_str(request: &Request, name: &str) -> Result<Option<String>, AuthMiddlewareError> {
    match request.headers().get(name) {
        None => Ok(None),
        Some(value) => value.to_str().map(|v| Some(v.to_string())).map_err(|_| {
            AuthMiddlewareError(ApiError::unauthorized(format!(
                "Malformed {} header",
                name
            )))
        }),
    }
}

fn inject_context(request: &mut Request, principal: Principal) {
    let ip_address = extract_client_ip(request);
    debug!(
        owner = %principal.owner,
        source = principal.source.as_str(),
        "request authenticated"
    );
    request
        .extensions_mut()
        .insert(RequestContext::new(principal).with_ip(ip_address));
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Error wrapper for middleware rejections.
#[derive(Debug)]
pub struct AuthMiddlewareError(pub ApiError);

impl IntoResponse for AuthMiddlewareError {
    fn into_response(self) -> Response {
        self.0.into_response()
    }
}

// ============================================================================
// TYPED EXTRACTOR
// ============================================================================

/// The authenticated caller, as injected by either middleware.
///
/// Handlers behind no authentication middleware get a 500.
#[derive(Debug, Clone)]
pub struct CurrentRequest(pub RequestContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentRequest
where
    S: Send + Sync,
{
    type Rejection = AuthMiddlewareError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .map(CurrentRequest)
            .ok_or_else(|| {
                AuthMiddlewareError(ApiError::internal_error(
                    "RequestContext not found in request extensions. \
                     Ensure an auth middleware is applied to this route.",
                ))
            })
    }
}

impl std::ops::Deref for CurrentRequest {
    type Target = RequestContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Key management is reserved for signed-in dashboard users.
pub fn require_session(ctx: &RequestContext) -> ApiResult<()> {
    match ctx.principal.source {
        Source::Dashboard => Ok(()),
        Source::Api => Err(ApiError::forbidden(
            "API keys cannot manage API keys; sign in to the dashboard",
        )),
    }
}

/// Origin address for activity records: first `X-Forwarded-For` entry, then
/// `X-Real-IP`, then the peer socket address when the server recorded one.
pub fn extract_client_ip(request: &Request) -> Option<IpAddr> {
    if let Some(forwarded_for) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
    {
        if let Some(first_ip) = forwarded_for.split(',').next() {
            if let Ok(ip) = first_ip.trim().parse() {
                return Some(ip);
            }
        }
    }

    if let Some(real_ip) = request
        .headers()
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
    {
        if let Ok(ip) = real_ip.trim().parse() {
            return Some(ip);
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

// ============================================================================
// TESTS
// ============================================================================
