//! On-device storage for downloaded audio, progress snapshots and metadata.
//!
//! One SQLite file with a schema version in `PRAGMA user_version`. There is
//! no eviction; entries leave only through explicit deletes.

use crate::error::LecternError;
use crate::types::ProgressUpdate;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};
use url::Url;

pub const OFFLINE_SCHEMA_VERSION: i64 = 1;

const OFFLINE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS audio (
    chapter_id TEXT PRIMARY KEY,
    mime TEXT NOT NULL,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS progress (
    chapter_id TEXT PRIMARY KEY,
    position_secs REAL NOT NULL,
    is_completed INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS http_cache (
    url TEXT PRIMARY KEY,
    content_type TEXT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL
)
"#;

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct OfflineProgress {
    pub chapter_id: String,
    #[sqlx(rename = "position_secs")]
    pub current_time: f64,
    pub is_completed: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct CachedResponse {
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}

/// A temporary file standing in for a browser object URL.
///
/// The file outlives this value; call `revoke` when playback no longer needs it.
#[derive(Debug)]
pub struct ObjectUrl {
    path: PathBuf,
    mime: String,
}

impl ObjectUrl {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn url(&self) -> Result<Url, LecternError> {
        Url::from_file_path(&self.path)
            .map_err(|_| LecternError::BadRequest(format!("{} is not absolute", self.path.display())))
    }

    pub async fn revoke(self) -> Result<(), LecternError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Clone)]
pub struct OfflineStore {
    pool: Pool<Sqlite>,
    scratch_dir: PathBuf,
}

impl OfflineStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LecternError> {
        let opts = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;
        Self::init(pool).await
    }

    pub async fn open_in_memory() -> Result<Self, LecternError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        Self::init(pool).await
    }

    async fn init(pool: Pool<Sqlite>) -> Result<Self, LecternError> {
        let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(&pool)
            .await?;
        if version > OFFLINE_SCHEMA_VERSION {
            return Err(LecternError::Conflict(format!(
                "offline store version {version} is newer than supported {OFFLINE_SCHEMA_VERSION}"
            )));
        }
        if version < OFFLINE_SCHEMA_VERSION {
            for stmt in OFFLINE_INIT.split(';') {
                let s = stmt.trim();
                if s.is_empty() {
                    continue;
                }
                sqlx::query(s).execute(&pool).await?;
            }
            sqlx::query(&format!("PRAGMA user_version = {OFFLINE_SCHEMA_VERSION}"))
                .execute(&pool)
                .await?;
            info!(from = version, to = OFFLINE_SCHEMA_VERSION, "offline store upgraded");
        }

        Ok(Self {
            pool,
            scratch_dir: std::env::temp_dir().join("lectern-blobs"),
        })
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub async fn put_audio(
        &self,
        chapter_id: &str,
        data: &[u8],
        mime: &str,
    ) -> Result<(), LecternError> {
        sqlx::query(
            r#"INSERT INTO audio (chapter_id, mime, data, stored_at) VALUES (?, ?, ?, ?)
               ON CONFLICT(chapter_id) DO UPDATE SET
                   mime=excluded.mime, data=excluded.data, stored_at=excluded.stored_at"#,
        )
        .bind(chapter_id)
        .bind(mime)
        .bind(data)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        debug!(chapter_id, bytes = data.len(), "audio stored offline");
        Ok(())
    }

    pub async fn is_downloaded(&self, chapter_id: &str) -> Result<bool, LecternError> {
        let rec: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audio WHERE chapter_id = ?")
            .bind(chapter_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(rec.0 > 0)
    }

    pub async fn downloaded_chapters(&self) -> Result<Vec<String>, LecternError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT chapter_id FROM audio ORDER BY stored_at DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Materialise the stored audio as a temp file. `None` when not downloaded.
    pub async fn audio_url(&self, chapter_id: &str) -> Result<Option<ObjectUrl>, LecternError> {
        let row: Option<(String, Vec<u8>)> =
            sqlx::query_as("SELECT mime, data FROM audio WHERE chapter_id = ?")
                .bind(chapter_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some((mime, data)) = row else {
            return Ok(None);
        };

        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let path = self.scratch_dir.join(format!(
            "{}-{}.{}",
            sanitize(chapter_id),
            uuid::Uuid::new_v4().simple(),
            extension_for(&mime)
        ));
        tokio::fs::write(&path, &data).await?;
        Ok(Some(ObjectUrl { path, mime }))
    }

    pub async fn put_progress(&self, update: &ProgressUpdate) -> Result<(), LecternError> {
        sqlx::query(
            r#"INSERT INTO progress (chapter_id, position_secs, is_completed, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(chapter_id) DO UPDATE SET
                   position_secs=excluded.position_secs,
                   is_completed=MAX(progress.is_completed, excluded.is_completed),
                   updated_at=excluded.updated_at"#,
        )
        .bind(&update.chapter_id)
        .bind(update.current_time)
        .bind(update.is_completed)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn progress(&self, chapter_id: &str) -> Result<Option<OfflineProgress>, LecternError> {
        Ok(sqlx::query_as::<_, OfflineProgress>(
            "SELECT chapter_id, position_secs, is_completed, updated_at FROM progress WHERE chapter_id = ?",
        )
        .bind(chapter_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Remove a chapter's audio and progress together.
    pub async fn delete_chapter(&self, chapter_id: &str) -> Result<bool, LecternError> {
        let mut tx = self.pool.begin().await?;
        let audio = sqlx::query("DELETE FROM audio WHERE chapter_id = ?")
            .bind(chapter_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM progress WHERE chapter_id = ?")
            .bind(chapter_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(audio.rows_affected() > 0)
    }

    pub async fn set_meta<T: Serialize>(&self, key: &str, value: &T) -> Result<(), LecternError> {
        let json = serde_json::to_string(value)?;
        sqlx::query(
            "INSERT INTO metadata (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        )
        .bind(key)
        .bind(json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_meta<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, LecternError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(v,)| serde_json::from_str(&v).map_err(LecternError::from))
            .transpose()
    }

    pub async fn delete_meta(&self, key: &str) -> Result<(), LecternError> {
        sqlx::query("DELETE FROM metadata WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn cache_get(&self, url: &str) -> Result<Option<CachedResponse>, LecternError> {
        Ok(sqlx::query_as::<_, CachedResponse>(
            "SELECT url, content_type, body, stored_at FROM http_cache WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn cache_put(
        &self,
        url: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<(), LecternError> {
        sqlx::query(
            r#"INSERT INTO http_cache (url, content_type, body, stored_at) VALUES (?, ?, ?, ?)
               ON CONFLICT(url) DO UPDATE SET
                   content_type=excluded.content_type, body=excluded.body, stored_at=excluded.stored_at"#,
        )
        .bind(url)
        .bind(content_type)
        .bind(body)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "audio/mp4" | "audio/x-m4a" | "audio/aac" => "m4a",
        "audio/ogg" => "ogg",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/webm" => "webm",
        _ => "mp3",
    }
}
