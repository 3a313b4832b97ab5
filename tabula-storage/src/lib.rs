//! Tabula Storage - Execution Layer
//!
//! Runs the statements built by `tabula-core` against SQLite or PostgreSQL
//! and keeps the schema store, activity log and API keys in metadata tables
//! on the same database.

pub mod activity;
pub mod api_keys;
pub mod backend;
pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod ddl_engine;
pub mod rows;
pub mod service;
pub mod transfer;

pub use activity::{
    ActivityEntry, ActivityPage, ActivityQuery, ActivitySink, SharedActivitySink, SqlActivityLog,
};
pub use api_keys::{ApiKeyStore, IssuedApiKey};
pub use backend::{PostgresBackend, ResultSet, SharedBackend, SqlBackend, SqliteBackend};
pub use catalog::SchemaStore;
pub use config::{DbConfig, SqliteConfig, StorageConfig};
pub use ddl_engine::DdlEngine;
pub use rows::{RowEngine, RowListing};
pub use service::{OwnerStats, TableService, TableSchema, TableSummary};
pub use transfer::{ExportDocument, ImportReport, TransferFormat, MAX_REPORTED_ERRORS};
