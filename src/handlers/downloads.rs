use crate::db::DownloadedContent;
use crate::error::LecternError;
use crate::middleware::AuthUser;
use crate::router::LecternState;
use crate::service::downloads::audio_content_type;
use axum::{
    Json,
    body::Body,
    extract::{Path, Request, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub chapter_id: String,
}

pub async fn list_downloads(
    AuthUser(user): AuthUser,
    State(state): State<LecternState>,
) -> Result<Json<Vec<DownloadedContent>>, LecternError> {
    Ok(Json(state.storage.list_downloads(&user.id).await?))
}

pub async fn create_download(
    AuthUser(user): AuthUser,
    State(state): State<LecternState>,
    Json(req): Json<DownloadRequest>,
) -> Result<(StatusCode, Json<DownloadedContent>), LecternError> {
    let record = state.downloads.download(&user.id, &req.chapter_id).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// DELETE /api/downloads/{chapter_id}. Also forgets the user's progress for the chapter.
pub async fn delete_download(
    AuthUser(user): AuthUser,
    State(state): State<LecternState>,
    Path(chapter_id): Path<String>,
) -> Result<StatusCode, LecternError> {
    if state.downloads.delete(&user.id, &chapter_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(LecternError::NotFound(format!("download of chapter {chapter_id}")))
    }
}

/// GET /api/chapters/{id}/audio: the local copy when one exists, else a redirect upstream.
///
/// Local files are streamed and honour `Range`, so players can seek without a full fetch.
pub async fn chapter_audio(
    _user: AuthUser,
    State(state): State<LecternState>,
    Path(chapter_id): Path<String>,
    req: Request,
) -> Result<Response, LecternError> {
    let chapter = state.storage.get_chapter(&chapter_id).await?;

    if let Some(path) = state.downloads.local_path(&chapter.id).await? {
        debug!(chapter_id, path = %path.display(), "serving local audio");
        let Ok(resp) = ServeFile::new(&path).oneshot(req).await;
        let mut resp = resp.map(Body::new);
        if resp.status().is_success() {
            let headers = resp.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(audio_content_type(&path)),
            );
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("private, max-age=86400"),
            );
        }
        return Ok(resp);
    }

    match chapter.audio_url.as_deref() {
        Some(url) => Ok(Redirect::temporary(url).into_response()),
        None => Err(LecternError::NotFound(format!("audio for chapter {chapter_id}"))),
    }
}
