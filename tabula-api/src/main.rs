//! Tabula API Server Entry Point
//!
//! Reads configuration from the environment, opens the storage backend and
//! starts the Axum HTTP server.

use std::net::SocketAddr;

use tabula_api::telemetry::{init_tracing, TelemetryConfig};
use tabula_api::{create_api_router, ApiConfig, ApiError, ApiResult, AuthConfig};
use tabula_storage::{StorageConfig, TableService};

fn config_error(e: tabula_core::ConfigError) -> ApiError {
    ApiError::invalid_input(format!("Invalid configuration: {}", e))
}

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::from_env().map_err(config_error)?;
    init_tracing(&telemetry_config)?;

    let storage_config = StorageConfig::from_env().map_err(config_error)?;
    let api_config = ApiConfig::from_env().map_err(config_error)?;
    let auth_config = AuthConfig::from_env().map_err(config_error)?;

    let service = TableService::open(&storage_config, auth_config.owners.clone()).await?;
    tracing::info!(
        engine = storage_config.kind().dialect().name(),
        "Storage backend ready"
    );

    let app = create_api_router(service, &api_config, auth_config)?;

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting Tabula API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("TABULA_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("TABULA_API_PORT").ok())
        .unwrap_or_else(|| "3000".to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
