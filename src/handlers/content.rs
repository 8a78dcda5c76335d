use crate::db::{Assignment, Chapter, Course, Granularity, TextSegment};
use crate::error::LecternError;
use crate::middleware::AuthUser;
use crate::router::LecternState;
use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SegmentsQuery {
    pub granularity: Option<Granularity>,
}

pub async fn list_courses(
    _user: AuthUser,
    State(state): State<LecternState>,
) -> Result<Json<Vec<Course>>, LecternError> {
    Ok(Json(state.storage.list_courses().await?))
}

pub async fn get_course(
    _user: AuthUser,
    State(state): State<LecternState>,
    Path(id): Path<String>,
) -> Result<Json<Course>, LecternError> {
    Ok(Json(state.storage.get_course(&id).await?))
}

/// GET /api/courses/{id}/assignments. Unknown course is a 404, not an empty list.
pub async fn list_assignments(
    _user: AuthUser,
    State(state): State<LecternState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Assignment>>, LecternError> {
    state.storage.get_course(&id).await?;
    Ok(Json(state.storage.list_assignments(&id).await?))
}

pub async fn get_assignment(
    _user: AuthUser,
    State(state): State<LecternState>,
    Path(id): Path<String>,
) -> Result<Json<Assignment>, LecternError> {
    Ok(Json(state.storage.get_assignment(&id).await?))
}

pub async fn list_chapters(
    _user: AuthUser,
    State(state): State<LecternState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Chapter>>, LecternError> {
    state.storage.get_assignment(&id).await?;
    Ok(Json(state.storage.list_chapters(&id).await?))
}

pub async fn get_chapter(
    _user: AuthUser,
    State(state): State<LecternState>,
    Path(id): Path<String>,
) -> Result<Json<Chapter>, LecternError> {
    Ok(Json(state.storage.get_chapter(&id).await?))
}

pub async fn list_segments(
    _user: AuthUser,
    State(state): State<LecternState>,
    Path(id): Path<String>,
    Query(query): Query<SegmentsQuery>,
) -> Result<Json<Vec<TextSegment>>, LecternError> {
    state.storage.get_chapter(&id).await?;
    Ok(Json(state.storage.list_segments(&id, query.granularity).await?))
}
