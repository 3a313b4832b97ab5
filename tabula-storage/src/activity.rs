//! Activity log: the write side used by every mutation and the read side
//! behind the dashboard's activity viewer.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Serialize;
use std::sync::Arc;
use tabula_core::query::{total_pages, DEFAULT_LIMIT, MAX_LIMIT};
use tabula_core::{
    ActionKind, ActivityRecord, ColumnType, OwnerId, Statement, StorageError, TabulaError,
    TabulaResult, Timestamp, Value,
};
use tracing::warn;

use crate::backend::SharedBackend;
use crate::bootstrap::ACTIVITY_TABLE;

/// Accepts activity records. Implementations must not block the caller on
/// anything but their own write.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn record(&self, record: ActivityRecord) -> TabulaResult<()>;
}

pub type SharedActivitySink = Arc<dyn ActivitySink>;

/// Write `record`, logging instead of failing. The mutation it describes has
/// already happened.
pub async fn record_or_warn(sink: &dyn ActivitySink, record: ActivityRecord) {
    let action = record.action;
    let owner = record.owner;
    if let Err(e) = sink.record(record).await {
        warn!(%owner, %action, error = %e, "failed to record activity");
    }
}

// ============================================================================
// QUERIES
// ============================================================================

/// Activity viewer filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityQuery {
    pub page: u64,
    pub limit: u64,
    /// Exact action match.
    pub action: Option<ActionKind>,
    /// Case-insensitive substring of the table name.
    pub table: Option<String>,
}

impl Default for ActivityQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_LIMIT,
            action: None,
            table: None,
        }
    }
}

impl ActivityQuery {
    pub fn new(page: u64, limit: u64) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, MAX_LIMIT),
            ..Self::default()
        }
    }
}

/// A stored activity record and its log id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEntry {
    pub id: i64,
    #[serde(flatten)]
    pub record: ActivityRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityPage {
    pub entries: Vec<ActivityEntry>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

// ============================================================================
// SQL LOG
// ============================================================================

/// Activity log kept in the `tabula_activity_log` metadata table.
#[derive(Clone)]
pub struct SqlActivityLog {
    backend: SharedBackend,
}

const SELECT_COLUMNS: &str =
    "id, owner_id, action, table_name, description, metadata, ip_address, source, created_at";

impl SqlActivityLog {
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// Newest first.
    pub async fn list(&self, owner: OwnerId, query: &ActivityQuery) -> TabulaResult<ActivityPage> {
        let dialect = self.backend.dialect();
        let mut params = vec![Value::Integer(owner.as_i64())];
        let mut predicates = vec![format!("owner_id = {}", dialect.placeholder(1))];

        if let Some(action) = query.action {
            params.push(Value::Text(action.as_str().to_string()));
            predicates.push(format!("action = {}", dialect.placeholder(params.len())));
        }
        if let Some(table) = query.table.as_deref().filter(|t| !t.is_empty()) {
            params.push(Value::Text(format!("%{}%", table)));
            let like = dialect.capabilities().case_insensitive_like.unwrap_or("LIKE");
            predicates.push(format!(
                "table_name {} {}",
                like,
                dialect.placeholder(params.len())
            ));
        }
        let where_clause = predicates.join(" AND ");

        let count = self
            .backend
            .query(&Statement::with_params(
                format!("SELECT COUNT(*) FROM {} WHERE {}", ACTIVITY_TABLE, where_clause),
                params.clone(),
            ))
            .await?
            .scalar_u64()?;

        let offset = (query.page - 1).saturating_mul(query.limit);
        params.push(Value::Integer(query.limit as i64));
        let limit_placeholder = dialect.placeholder(params.len());
        params.push(Value::Integer(offset as i64));
        let offset_placeholder = dialect.placeholder(params.len());

        let result = self
            .backend
            .query(&Statement::with_params(
                format!(
                    "SELECT {} FROM {} WHERE {} ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
                    SELECT_COLUMNS, ACTIVITY_TABLE, where_clause, limit_placeholder, offset_placeholder
                ),
                params,
            ))
            .await?;

        let entries = result
            .rows
            .into_iter()
            .map(decode_entry)
            .collect::<TabulaResult<Vec<_>>>()?;

        Ok(ActivityPage {
            entries,
            total: count,
            page: query.page,
            limit: query.limit,
            total_pages: total_pages(count, query.limit),
        })
    }

    /// Records created at or after `since`.
    pub async fn count_since(&self, owner: OwnerId, since: Timestamp) -> TabulaResult<u64> {
        let dialect = self.backend.dialect();
        self.backend
            .query(&Statement::with_params(
                format!(
                    "SELECT COUNT(*) FROM {} WHERE owner_id = {} AND created_at >= {}",
                    ACTIVITY_TABLE,
                    dialect.placeholder(1),
                    dialect.placeholder(2)
                ),
                vec![
                    Value::Integer(owner.as_i64()),
                    Value::Timestamp(since.naive_utc()),
                ],
            ))
            .await?
            .scalar_u64()
    }
}

#[async_trait]
impl ActivitySink for SqlActivityLog {
    async fn record(&self, record: ActivityRecord) -> TabulaResult<()> {
        let dialect = self.backend.dialect();
        let placeholders = (1..=8)
            .map(|i| dialect.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ");
        let statement = Statement::with_params(
            format!(
                "INSERT INTO {} (owner_id, action, table_name, description, metadata, ip_address, source, created_at) VALUES ({})",
                ACTIVITY_TABLE, placeholders
            ),
            vec![
                Value::Integer(record.owner.as_i64()),
                Value::Text(record.action.as_str().to_string()),
                record.table_name.map(Value::Text).unwrap_or(Value::Null),
                Value::Text(record.description),
                Value::Text(record.metadata.to_string()),
                record
                    .ip_address
                    .map(|ip| Value::Text(ip.to_string()))
                    .unwrap_or(Value::Null),
                Value::Text(record.source.as_str().to_string()),
                Value::Timestamp(record.created_at.naive_utc()),
            ],
        );
        self.backend.execute(&statement).await?;
        Ok(())
    }
}

fn corrupt(reason: impl Into<String>) -> TabulaError {
    StorageError::CorruptMetadata {
        what: ACTIVITY_TABLE.to_string(),
        reason: reason.into(),
    }
    .into()
}

fn text(value: Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s),
        _ => None,
    }
}

fn decode_entry(row: Vec<Value>) -> TabulaResult<ActivityEntry> {
    let [id, owner, action, table_name, description, metadata, ip_address, source, created_at]: [Value; 9] =
        row.try_into().map_err(|_| corrupt("unexpected column count"))?;

    let id = id.as_i64().ok_or_else(|| corrupt("id is not an integer"))?;
    let owner = owner
        .as_i64()
        .map(OwnerId)
        .ok_or_else(|| corrupt("owner_id is not an integer"))?;
    let action = text(action)
        .ok_or_else(|| corrupt("action is not text"))?
        .parse::<ActionKind>()
        .map_err(|e| corrupt(e.to_string()))?;
    let metadata = match text(metadata) {
        Some(json) => serde_json::from_str(&json).map_err(|e| corrupt(e.to_string()))?,
        None => serde_json::json!({}),
    };
    // Unparseable addresses are dropped rather than failing the page.
    let ip_address = text(ip_address).and_then(|ip| ip.parse().ok());
    let source = text(source)
        .ok_or_else(|| corrupt("source is not text"))?
        .parse()
        .map_err(|e: tabula_core::ValidationError| corrupt(e.to_string()))?;
    let created_at = created_at
        .conform(ColumnType::Datetime)
        .as_timestamp()
        .map(|ts| Utc.from_utc_datetime(&ts))
        .ok_or_else(|| corrupt("created_at is not a timestamp"))?;

    Ok(ActivityEntry {
        id,
        record: ActivityRecord {
            owner,
            action,
            table_name: text(table_name),
            description: text(description).unwrap_or_default(),
            metadata,
            ip_address,
            source,
            created_at,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqliteBackend;
    use crate::bootstrap::bootstrap;
    use tabula_core::{Principal, RequestContext};

    async fn log() -> TabulaResult<SqlActivityLog> {
        let backend: SharedBackend = Arc::new(SqliteBackend::in_memory()?);
        bootstrap(backend.as_ref()).await?;
        Ok(SqlActivityLog::new(backend))
    }

    #[tokio::test]
    async fn test_record_and_list_newest_first() -> TabulaResult<()> {
        let log = log().await?;
        let ctx = RequestContext::new(Principal::api_key(OwnerId(7), "ci"))
            .with_ip(Some("10.0.0.1".parse().map_err(|_| corrupt("ip"))?));

        let mut first = ActivityRecord::new(&ctx, ActionKind::CreateTable, "orders", "Created");
        first.created_at = Utc::now() - chrono::Duration::minutes(5);
        log.record(first).await?;
        log.record(ActivityRecord::new(&ctx, ActionKind::InsertRow, "orders", "Inserted"))
            .await?;

        let page = log.list(OwnerId(7), &ActivityQuery::default()).await?;
        assert_eq!(page.total, 2);
        assert_eq!(page.entries[0].record.action, ActionKind::InsertRow);
        assert_eq!(page.entries[0].record.metadata["api_key_name"], "ci");
        assert_eq!(page.entries[0].record.ip_address.map(|ip| ip.to_string()), Some("10.0.0.1".to_string()));

        let other = log.list(OwnerId(8), &ActivityQuery::default()).await?;
        assert_eq!(other.total, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_filters_and_count_since() -> TabulaResult<()> {
        let log = log().await?;
        let ctx = RequestContext::new(Principal::dashboard(OwnerId(1)));
        log.record(ActivityRecord::new(&ctx, ActionKind::CreateTable, "Orders", "a")).await?;
        log.record(ActivityRecord::new(&ctx, ActionKind::InsertRow, "orders", "b")).await?;
        log.record(ActivityRecord::new(&ctx, ActionKind::InsertRow, "people", "c")).await?;

        let mut query = ActivityQuery::default();
        query.action = Some(ActionKind::InsertRow);
        assert_eq!(log.list(OwnerId(1), &query).await?.total, 2);

        query.table = Some("order".to_string());
        assert_eq!(log.list(OwnerId(1), &query).await?.total, 1);

        let since = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(log.count_since(OwnerId(1), since).await?, 3);
        Ok(())
    }
}
