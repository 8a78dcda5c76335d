use super::sqlite::{LecternStorage, new_id};
use crate::db::models::UserProgress;
use crate::error::LecternError;
use chrono::Utc;

const PROGRESS_COLUMNS: &str = "id, user_id, chapter_id, position_secs, is_completed, \
     completed_at, created_at, updated_at";

impl LecternStorage {
    /// Upsert by (user_id, chapter_id). Position is last-write-wins; completion is sticky.
    pub async fn upsert_progress(
        &self,
        user_id: &str,
        chapter_id: &str,
        current_time: f64,
        is_completed: bool,
    ) -> Result<UserProgress, LecternError> {
        let now = Utc::now();
        let completed_at = is_completed.then_some(now);
        sqlx::query(
            r#"
            INSERT INTO user_progress (
                id, user_id, chapter_id, position_secs, is_completed, completed_at,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, chapter_id) DO UPDATE SET
                position_secs=excluded.position_secs,
                is_completed=MAX(user_progress.is_completed, excluded.is_completed),
                completed_at=COALESCE(user_progress.completed_at, excluded.completed_at),
                updated_at=excluded.updated_at
            "#,
        )
        .bind(new_id())
        .bind(user_id)
        .bind(chapter_id)
        .bind(current_time)
        .bind(is_completed)
        .bind(completed_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_progress(user_id, chapter_id)
            .await?
            .ok_or_else(|| LecternError::NotFound(format!("progress for chapter {chapter_id}")))
    }

    pub async fn get_progress(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<Option<UserProgress>, LecternError> {
        let sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM user_progress WHERE user_id = ? AND chapter_id = ?"
        );
        Ok(sqlx::query_as::<_, UserProgress>(&sql)
            .bind(user_id)
            .bind(chapter_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list_progress(&self, user_id: &str) -> Result<Vec<UserProgress>, LecternError> {
        let sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM user_progress WHERE user_id = ? ORDER BY updated_at DESC"
        );
        Ok(sqlx::query_as::<_, UserProgress>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn delete_progress(&self, user_id: &str, chapter_id: &str) -> Result<bool, LecternError> {
        let res = sqlx::query("DELETE FROM user_progress WHERE user_id = ? AND chapter_id = ?")
            .bind(user_id)
            .bind(chapter_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
