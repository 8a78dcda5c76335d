use crate::db::SyncLog;
use crate::error::LecternError;
use crate::middleware::RequireAdmin;
use crate::router::LecternState;
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::info;

const DEFAULT_LOG_LIMIT: i64 = 20;
const MAX_LOG_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<i64>,
}

/// POST /api/admin/sync: start a content sync in the background.
///
/// Returns 202 with the new log row, or 409 while another run is in progress.
pub async fn trigger_sync(
    admin: RequireAdmin,
    State(state): State<LecternState>,
) -> Result<(StatusCode, Json<SyncLog>), LecternError> {
    let log = state.sync.trigger().await?;
    info!(
        sync_id = %log.id,
        by = admin.user.as_ref().map(|u| u.email.as_str()).unwrap_or("admin key"),
        "sync triggered"
    );
    Ok((StatusCode::ACCEPTED, Json(log)))
}

/// GET /api/admin/sync/status: the latest run, `null` before the first one.
pub async fn sync_status(
    _admin: RequireAdmin,
    State(state): State<LecternState>,
) -> Result<Json<Option<SyncLog>>, LecternError> {
    Ok(Json(state.sync.status().await?))
}

pub async fn sync_logs(
    _admin: RequireAdmin,
    State(state): State<LecternState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<SyncLog>>, LecternError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .clamp(1, MAX_LOG_LIMIT);
    Ok(Json(state.storage.recent_syncs(limit).await?))
}
