//! Stats and Activity REST API Routes
//!
//! Read side of the activity log: dashboard counters and the paginated
//! activity viewer.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tabula_core::{ActionKind, Timestamp};
use tabula_storage::{ActivityEntry, ActivityQuery, TableService};

use crate::{
    error::ApiResult,
    middleware::CurrentRequest,
    types::{ActivityLogEntry, ActivityLogResponse, ActivityParams},
};

#[derive(Clone)]
pub struct ActivityState {
    pub service: TableService,
}

impl ActivityState {
    pub fn new(service: TableService) -> Self {
        Self { service }
    }
}

/// Relative age of an entry as shown in the viewer.
pub fn time_ago(created_at: Timestamp, now: DateTime<Utc>) -> String {
    let seconds = (now - created_at).num_seconds().max(0);
    if seconds < 60 {
        "Just now".to_string()
    } else if seconds < 3600 {
        format!("{}m ago", seconds / 60)
    } else if seconds < 86_400 {
        format!("{}h ago", seconds / 3600)
    } else if seconds < 7 * 86_400 {
        format!("{}d ago", seconds / 86_400)
    } else {
        created_at.format("%b %d, %Y").to_string()
    }
}

/// Unparseable numbers and unknown actions are treated as absent.
fn activity_query(params: &ActivityParams) -> ActivityQuery {
    let page = params
        .page
        .as_deref()
        .and_then(|p| p.trim().parse::<u64>().ok())
        .unwrap_or(1);
    let limit = params
        .limit
        .as_deref()
        .and_then(|l| l.trim().parse::<u64>().ok())
        .unwrap_or(ActivityQuery::default().limit);

    ActivityQuery {
        action: params
            .action
            .as_deref()
            .and_then(|a| a.parse::<ActionKind>().ok()),
        table: params
            .table
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string),
        ..ActivityQuery::new(page, limit)
    }
}

fn log_entry(entry: ActivityEntry, now: DateTime<Utc>) -> ActivityLogEntry {
    let record = entry.record;
    ActivityLogEntry {
        id: entry.id,
        time_ago: time_ago(record.created_at, now),
        action: record.action,
        table_name: record.table_name,
        description: record.description,
        metadata: record.metadata,
        ip_address: record.ip_address,
        source: record.source,
        created_at: record.created_at,
    }
}

/// GET /api/stats - Dashboard counters
pub async fn get_stats(
    State(state): State<Arc<ActivityState>>,
    ctx: CurrentRequest,
) -> ApiResult<impl IntoResponse> {
    let stats = state.service.stats(ctx.owner()).await?;
    Ok(Json(stats))
}

/// GET /api/activity - Newest-first activity log
pub async fn list_activity(
    State(state): State<Arc<ActivityState>>,
    ctx: CurrentRequest,
    Query(params): Query<ActivityParams>,
) -> ApiResult<impl IntoResponse> {
    let query = activity_query(&params);
    let page = state.service.list_activity(ctx.owner(), &query).await?;
    let now = Utc::now();

    Ok(Json(ActivityLogResponse {
        logs: page.entries.into_iter().map(|e| log_entry(e, now)).collect(),
        total: page.total,
        page: page.page,
        page_size: page.limit,
        total_pages: page.total_pages,
    }))
}

pub fn create_router(service: TableService) -> Router {
    let state = Arc::new(ActivityState::new(service));

    Router::new()
        .route("/stats", get(get_stats))
        .route("/activity", get(list_activity))
        .with_state(state)
}
