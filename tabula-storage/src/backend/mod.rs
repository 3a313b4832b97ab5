//! SQL execution backends.
//!
//! A backend runs [`Statement`]s produced by `tabula-core` against one
//! engine and reports results as [`Value`]s. It knows nothing about logical
//! tables; the dialect it reports decides how statements were built.

use async_trait::async_trait;
use std::sync::Arc;
use tabula_core::{Dialect, StorageError, TabulaResult, Value};

pub use tabula_core::Statement;

pub mod postgres;
pub mod sqlite;

pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

/// Rows returned by a query, in select-list order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// First column of the first row, for `COUNT(*)`-style queries.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }

    pub fn scalar_u64(&self) -> TabulaResult<u64> {
        self.scalar()
            .and_then(Value::as_i64)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| {
                StorageError::Execution {
                    message: "expected a single non-negative integer result".to_string(),
                }
                .into()
            })
    }
}

/// One SQL engine.
#[async_trait]
pub trait SqlBackend: Send + Sync {
    fn dialect(&self) -> &'static dyn Dialect;

    /// Run a statement and return the number of affected rows.
    async fn execute(&self, statement: &Statement) -> TabulaResult<u64>;

    async fn query(&self, statement: &Statement) -> TabulaResult<ResultSet>;

    /// Run an insert and return the new row's identifier.
    ///
    /// When `returns_id` is set the statement carries a `RETURNING` clause
    /// and the identifier is read from its result; otherwise the engine's
    /// last-insert identifier is used, if it has one.
    async fn insert(&self, statement: &Statement, returns_id: bool) -> TabulaResult<Option<Value>>;

    /// Run several statements in one engine transaction.
    async fn execute_script(&self, statements: &[Statement]) -> TabulaResult<()>;

    /// On-disk size of the database in bytes, when the engine reports it.
    async fn database_size(&self) -> TabulaResult<Option<u64>>;

    /// Cheap liveness check.
    async fn ping(&self) -> TabulaResult<()>;
}

pub type SharedBackend = Arc<dyn SqlBackend>;
