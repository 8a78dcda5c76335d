use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub external_id: String,
    pub course_id: String,
    pub title: String,
    pub description: Option<String>,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub external_id: String,
    pub assignment_id: String,
    pub title: String,
    pub description: Option<String>,
    pub audio_url: Option<String>,
    pub duration_secs: Option<f64>,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum Granularity {
    Sentence,
    Word,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TextSegment {
    pub id: String,
    pub chapter_id: String,
    pub granularity: Granularity,
    pub position: i64,
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    pub id: String,
    pub user_id: String,
    pub chapter_id: String,
    #[sqlx(rename = "position_secs")]
    pub current_time: f64,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DownloadedContent {
    pub id: String,
    pub user_id: String,
    pub chapter_id: String,
    #[serde(skip_serializing)]
    pub file_path: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum SyncStatus {
    InProgress,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SyncLog {
    pub id: String,
    pub status: SyncStatus,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct MagicLink {
    pub token: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Content records as pulled from the upstream API, keyed by external id.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseUpsert {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentUpsert {
    pub external_id: String,
    pub course_id: String,
    pub title: String,
    pub description: Option<String>,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChapterUpsert {
    pub external_id: String,
    pub assignment_id: String,
    pub title: String,
    pub description: Option<String>,
    pub audio_url: Option<String>,
    pub duration_secs: Option<f64>,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSegment {
    pub granularity: Granularity,
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
}
