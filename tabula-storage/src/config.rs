//! Storage configuration, read from the environment.

use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tabula_core::{ConfigError, DialectKind, StorageError, TabulaResult};
use tokio_postgres::NoTls;

// ============================================================================
// SQLITE
// ============================================================================

/// SQLite database file settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConfig {
    /// Database file, or `:memory:`.
    pub path: PathBuf,
    pub busy_timeout: Duration,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tabula.db"),
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

impl SqliteConfig {
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            path: std::env::var("TABULA_SQLITE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            busy_timeout: Duration::from_millis(
                parse_env("TABULA_SQLITE_BUSY_TIMEOUT_MS")?.unwrap_or(5000),
            ),
        })
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == ":memory:"
    }
}

// ============================================================================
// POSTGRESQL
// ============================================================================

/// PostgreSQL connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait for a free connection before giving up.
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "tabula".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            host: std::env::var("TABULA_DB_HOST").unwrap_or(defaults.host),
            port: parse_env("TABULA_DB_PORT")?.unwrap_or(defaults.port),
            dbname: std::env::var("TABULA_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("TABULA_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("TABULA_DB_PASSWORD").unwrap_or_default(),
            max_size: parse_env("TABULA_DB_POOL_SIZE")?.unwrap_or(defaults.max_size),
            timeout: Duration::from_secs(parse_env("TABULA_DB_TIMEOUT")?.unwrap_or(30)),
        })
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> TabulaResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: self.max_size,
            timeouts: deadpool_postgres::Timeouts::wait_millis(self.timeout.as_millis() as u64),
            ..Default::default()
        });

        cfg.create_pool(Some(Runtime::Tokio1), NoTls).map_err(|e| {
            StorageError::Connection {
                reason: format!("Failed to create pool: {}", e),
            }
            .into()
        })
    }
}

// ============================================================================
// ENGINE SELECTION
// ============================================================================

/// Which engine to run on, with its settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Sqlite(SqliteConfig),
    Postgres(DbConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite(SqliteConfig::default())
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let kind = match std::env::var("TABULA_DB_ENGINE") {
            Ok(raw) => raw.parse::<DialectKind>()?,
            Err(_) => DialectKind::default(),
        };
        match kind {
            DialectKind::Sqlite => SqliteConfig::from_env().map(StorageConfig::Sqlite),
            DialectKind::Postgres => DbConfig::from_env().map(StorageConfig::Postgres),
        }
    }

    pub fn kind(&self) -> DialectKind {
        match self {
            StorageConfig::Sqlite(_) => DialectKind::Sqlite,
            StorageConfig::Postgres(_) => DialectKind::Postgres,
        }
    }
}

fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| ConfigError::InvalidValue {
            field: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let previous = std::env::var(key).ok();
            std::env::set_var(key, value);
            Self { key, previous }
        }

        fn unset(key: &'static str) -> Self {
            let previous = std::env::var(key).ok();
            std::env::remove_var(key);
            Self { key, previous }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match &self.previous {
                Some(value) => std::env::set_var(self.key, value),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_default_engine_is_sqlite() -> Result<(), ConfigError> {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _engine = EnvVarGuard::unset("TABULA_DB_ENGINE");
        let _path = EnvVarGuard::set("TABULA_SQLITE_PATH", ":memory:");

        let config = StorageConfig::from_env()?;
        let StorageConfig::Sqlite(sqlite) = config else {
            panic!("expected sqlite");
        };
        assert!(sqlite.is_in_memory());
        assert_eq!(sqlite.busy_timeout, Duration::from_millis(5000));
        Ok(())
    }

    #[test]
    fn test_postgres_settings() -> Result<(), ConfigError> {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _engine = EnvVarGuard::set("TABULA_DB_ENGINE", "postgres");
        let _host = EnvVarGuard::set("TABULA_DB_HOST", "db.internal");
        let _port = EnvVarGuard::set("TABULA_DB_PORT", "6543");

        let config = StorageConfig::from_env()?;
        assert_eq!(config.kind(), DialectKind::Postgres);
        let StorageConfig::Postgres(db) = config else {
            panic!("expected postgres");
        };
        assert_eq!(db.host, "db.internal");
        assert_eq!(db.port, 6543);
        Ok(())
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _engine = EnvVarGuard::set("TABULA_DB_ENGINE", "sqlite");
        let _timeout = EnvVarGuard::set("TABULA_SQLITE_BUSY_TIMEOUT_MS", "soon");

        assert!(matches!(
            StorageConfig::from_env(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
