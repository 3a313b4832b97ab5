//! Middleware modules for the Tabula API
//!
//! - `auth`: session and API-key authentication, request context injection
//!
//! # Middleware Order
//!
//! ```ignore
//! Router::new()
//!     .nest("/api", dashboard_routes)
//!     // Dashboard: X-API-Key if present, else Bearer session
//!     .layer(middleware::from_fn_with_state(auth_state, session_auth_middleware))
//!     // Programmatic surface: X-API-Key only
//!     .nest("/api/v1", v1_routes.layer(middleware::from_fn_with_state(auth_state, api_key_middleware)))
//! ```

mod auth;

pub use auth::{
    api_key_middleware, extract_client_ip, require_session, session_auth_middleware,
    AuthMiddlewareError, AuthMiddlewareState, CurrentRequest, API_KEY_HEADER,
};
