use super::sqlite::{LecternStorage, new_id};
use crate::db::models::DownloadedContent;
use crate::error::LecternError;
use chrono::Utc;

impl LecternStorage {
    /// Record a finished download. An existing (user, chapter) row is pointed at the new file.
    pub async fn record_download(
        &self,
        user_id: &str,
        chapter_id: &str,
        file_path: &str,
        size_bytes: i64,
    ) -> Result<DownloadedContent, LecternError> {
        sqlx::query(
            r#"
            INSERT INTO downloaded_content (id, user_id, chapter_id, file_path, size_bytes, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, chapter_id) DO UPDATE SET
                file_path=excluded.file_path,
                size_bytes=excluded.size_bytes
            "#,
        )
        .bind(new_id())
        .bind(user_id)
        .bind(chapter_id)
        .bind(file_path)
        .bind(size_bytes)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.get_download(user_id, chapter_id)
            .await?
            .ok_or_else(|| LecternError::NotFound(format!("download of chapter {chapter_id}")))
    }

    pub async fn get_download(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<Option<DownloadedContent>, LecternError> {
        Ok(sqlx::query_as::<_, DownloadedContent>(
            r#"SELECT id, user_id, chapter_id, file_path, size_bytes, created_at
               FROM downloaded_content WHERE user_id = ? AND chapter_id = ?"#,
        )
        .bind(user_id)
        .bind(chapter_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn list_downloads(&self, user_id: &str) -> Result<Vec<DownloadedContent>, LecternError> {
        Ok(sqlx::query_as::<_, DownloadedContent>(
            r#"SELECT id, user_id, chapter_id, file_path, size_bytes, created_at
               FROM downloaded_content WHERE user_id = ? ORDER BY created_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Any user's local copy of a chapter, used to serve audio without hitting the origin.
    pub async fn any_download_path(&self, chapter_id: &str) -> Result<Option<String>, LecternError> {
        let rec: Option<(String,)> =
            sqlx::query_as("SELECT file_path FROM downloaded_content WHERE chapter_id = ? LIMIT 1")
                .bind(chapter_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(rec.map(|r| r.0))
    }

    /// Delete the download row and the user's progress for that chapter in one transaction.
    /// Returns the removed row, if there was one.
    pub async fn delete_download(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<Option<DownloadedContent>, LecternError> {
        let Some(existing) = self.get_download(user_id, chapter_id).await? else {
            return Ok(None);
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM downloaded_content WHERE id = ?")
            .bind(&existing.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM user_progress WHERE user_id = ? AND chapter_id = ?")
            .bind(user_id)
            .bind(chapter_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(existing))
    }

    /// Number of rows still pointing at `file_path`.
    pub async fn count_download_refs(&self, file_path: &str) -> Result<i64, LecternError> {
        let rec: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM downloaded_content WHERE file_path = ?")
                .bind(file_path)
                .fetch_one(&self.pool)
                .await?;
        Ok(rec.0)
    }
}
