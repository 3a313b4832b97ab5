//! REST API Routes Module
//!
//! Assembles the HTTP surface:
//! - `/api/...`: dashboard routes behind session (or API key) authentication
//! - `/api/v1/...`: programmatic routes behind API-key authentication
//! - `/health/...`: unauthenticated health checks

pub mod activity;
pub mod columns;
pub mod health;
pub mod keys;
pub mod public;
pub mod rows;
pub mod tables;
pub mod transfer;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn_with_state,
    Router,
};
use tabula_storage::TableService;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::AuthConfig;
use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{
    api_key_middleware, session_auth_middleware, AuthMiddlewareState, API_KEY_HEADER,
};

pub use activity::create_router as activity_router;
pub use columns::create_router as columns_router;
pub use health::create_router as health_router;
pub use keys::create_router as keys_router;
pub use public::create_router as public_router;
pub use rows::create_router as rows_router;
pub use tables::create_router as tables_router;
pub use transfer::create_router as transfer_router;

// ============================================================================
// PRODUCTION CHECKS
// ============================================================================

fn is_production_environment() -> bool {
    std::env::var("TABULA_ENVIRONMENT")
        .map(|e| matches!(e.to_lowercase().as_str(), "production" | "prod"))
        .unwrap_or(false)
}

fn validate_api_config_for_production(config: &ApiConfig) -> ApiResult<()> {
    if config.cors_origins.is_empty() {
        return Err(ApiError::invalid_input(
            "CORS origins not configured for production. Set TABULA_CORS_ORIGINS.",
        ));
    }
    Ok(())
}

// ============================================================================
// ROUTER BUILDER
// ============================================================================

/// Builds the full router with authentication applied per surface.
pub struct SecureRouterBuilder {
    service: TableService,
    api_config: ApiConfig,
    auth_state: AuthMiddlewareState,
}

impl SecureRouterBuilder {
    /// Refuses insecure settings when `TABULA_ENVIRONMENT` is production.
    pub fn new(
        service: TableService,
        api_config: ApiConfig,
        auth_config: AuthConfig,
    ) -> ApiResult<Self> {
        if is_production_environment() {
            auth_config.validate_for_production()?;
            validate_api_config_for_production(&api_config)?;
        }

        let auth_state = AuthMiddlewareState::new(Arc::new(auth_config), service.clone());

        Ok(Self {
            service,
            api_config,
            auth_state,
        })
    }

    fn build_dashboard_routes(&self) -> Router {
        Router::new()
            .merge(tables::create_router(self.service.clone()))
            .merge(rows::create_router(self.service.clone()))
            .merge(columns::create_router(self.service.clone()))
            .merge(transfer::create_router(self.service.clone()))
            .merge(activity::create_router(self.service.clone()))
            .merge(keys::create_router(self.service.clone()))
    }

    pub fn build(self) -> Router {
        let dashboard = self
            .build_dashboard_routes()
            .layer(from_fn_with_state(
                self.auth_state.clone(),
                session_auth_middleware,
            ));

        let v1 = public::create_router(self.service.clone()).layer(from_fn_with_state(
            self.auth_state.clone(),
            api_key_middleware,
        ));

        let cors = build_cors_layer(&self.api_config);

        Router::new()
            .nest("/api/v1", v1)
            .nest("/api", dashboard)
            .nest("/health", health::create_router(self.service.clone()))
            .layer(DefaultBodyLimit::max(self.api_config.body_limit_bytes))
            .layer(GlobalConcurrencyLimitLayer::new(
                self.api_config.max_concurrent_requests,
            ))
            .layer(CompressionLayer::new())
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }
}

// ============================================================================
// CORS CONFIGURATION
// ============================================================================

fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(API_KEY_HEADER),
        ])
        .expose_headers([header::CONTENT_DISPOSITION])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        if config.cors_allow_credentials {
            cors.allow_origin(origins).allow_credentials(true)
        } else {
            cors.allow_origin(origins)
        }
    }
}

/// Create the complete API router.
pub fn create_api_router(
    service: TableService,
    api_config: &ApiConfig,
    auth_config: AuthConfig,
) -> ApiResult<Router> {
    SecureRouterBuilder::new(service, api_config.clone(), auth_config).map(|builder| builder.build())
}
