//! API Configuration Module
//!
//! CORS and request-shaping settings for the HTTP server. Loaded from
//! environment variables with permissive development defaults.

use tabula_core::ConfigError;

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// HTTP-level configuration for CORS and request limits.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    /// Example: "https://tabula.run,https://app.tabula.run"
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Request Limits
    // ========================================================================
    /// Largest accepted request body. Imports carry whole tables.
    pub body_limit_bytes: usize,

    /// Requests handled concurrently before new ones wait.
    pub max_concurrent_requests: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(), // Empty = allow all
            cors_allow_credentials: false,
            cors_max_age_secs: 86400, // 24 hours
            body_limit_bytes: 10 * 1024 * 1024,
            max_concurrent_requests: 512,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TABULA_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `TABULA_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `TABULA_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `TABULA_API_BODY_LIMIT_BYTES`: Request body cap (default: 10 MiB)
    /// - `TABULA_API_MAX_CONCURRENCY`: In-flight request cap (default: 512)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let cors_origins = std::env::var("TABULA_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_allow_credentials = std::env::var("TABULA_CORS_ALLOW_CREDENTIALS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs: parse_env("TABULA_CORS_MAX_AGE_SECS", defaults.cors_max_age_secs)?,
            body_limit_bytes: parse_env("TABULA_API_BODY_LIMIT_BYTES", defaults.body_limit_bytes)?,
            max_concurrent_requests: parse_env(
                "TABULA_API_MAX_CONCURRENCY",
                defaults.max_concurrent_requests,
            )?
            .max(1),
        })
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // Wildcard subdomains: *.tabula.run
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain == pattern
                        || origin_domain.ends_with(&format!(".{}", pattern));
                }
            }
            false
        })
    }
}

/// Read a numeric variable, keeping `default` when it is unset.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: key.to_string(),
                value: raw.clone(),
                reason: "expected a non-negative integer".to_string(),
            })
        }
        _ => Ok(default),
    }
}
