use crate::db::UserProgress;
use crate::error::LecternError;
use crate::middleware::AuthUser;
use crate::router::LecternState;
use crate::types::{ProgressBatch, ProgressUpdate};
use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub saved: usize,
    pub skipped: Vec<String>,
}

pub async fn list_progress(
    AuthUser(user): AuthUser,
    State(state): State<LecternState>,
) -> Result<Json<Vec<UserProgress>>, LecternError> {
    Ok(Json(state.storage.list_progress(&user.id).await?))
}

/// GET /api/progress/{chapter_id}; 404 when the user never played the chapter.
pub async fn get_progress(
    AuthUser(user): AuthUser,
    State(state): State<LecternState>,
    Path(chapter_id): Path<String>,
) -> Result<Json<UserProgress>, LecternError> {
    state
        .storage
        .get_progress(&user.id, &chapter_id)
        .await?
        .map(Json)
        .ok_or_else(|| LecternError::NotFound(format!("progress for chapter {chapter_id}")))
}

pub async fn save_progress(
    AuthUser(user): AuthUser,
    State(state): State<LecternState>,
    Json(update): Json<ProgressUpdate>,
) -> Result<Json<UserProgress>, LecternError> {
    if !update.is_valid() {
        return Err(LecternError::BadRequest(
            "currentTime must be a non-negative number".to_string(),
        ));
    }
    state.storage.get_chapter(&update.chapter_id).await?;
    let saved = state
        .storage
        .upsert_progress(
            &user.id,
            &update.chapter_id,
            update.current_time,
            update.is_completed,
        )
        .await?;
    Ok(Json(saved))
}

/// POST /api/progress/batch from the client batcher.
///
/// Unknown chapters and invalid positions are reported in `skipped`; the
/// rest of the batch is still stored.
pub async fn save_progress_batch(
    AuthUser(user): AuthUser,
    State(state): State<LecternState>,
    Json(batch): Json<ProgressBatch>,
) -> Result<Json<BatchResult>, LecternError> {
    let mut result = BatchResult {
        saved: 0,
        skipped: Vec::new(),
    };
    for update in batch.updates {
        if !update.is_valid() {
            result.skipped.push(update.chapter_id);
            continue;
        }
        match state.storage.get_chapter(&update.chapter_id).await {
            Ok(_) => {}
            Err(LecternError::NotFound(_)) => {
                warn!(chapter_id = %update.chapter_id, "progress for unknown chapter skipped");
                result.skipped.push(update.chapter_id);
                continue;
            }
            Err(e) => return Err(e),
        }
        state
            .storage
            .upsert_progress(
                &user.id,
                &update.chapter_id,
                update.current_time,
                update.is_completed,
            )
            .await?;
        result.saved += 1;
    }
    debug!(user_id = %user.id, saved = result.saved, skipped = result.skipped.len(), "progress batch stored");
    Ok(Json(result))
}
