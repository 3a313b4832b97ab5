//! Tabula API - HTTP Layer
//!
//! Axum server exposing user-defined tables over two surfaces: the
//! session-authenticated dashboard API under `/api` and the API-key
//! authenticated programmatic API under `/api/v1`. All table work is
//! delegated to `tabula_storage::TableService`.

pub mod auth;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod telemetry;
pub mod types;

// Re-export commonly used types
pub use auth::{
    authenticate_session, generate_jwt_token, validate_jwt_token, AuthConfig, Claims, JwtClock,
    JwtSecret, SystemClock,
};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::{
    api_key_middleware, session_auth_middleware, AuthMiddlewareState, CurrentRequest,
};
pub use routes::{create_api_router, SecureRouterBuilder};
pub use types::*;
