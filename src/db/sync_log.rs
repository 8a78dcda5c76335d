use super::sqlite::{LecternStorage, new_id};
use crate::db::models::{SyncLog, SyncStatus};
use crate::error::LecternError;
use chrono::Utc;

impl LecternStorage {
    /// Insert an `in_progress` row. Fails with `Conflict` while another run is in progress.
    ///
    /// The check and the insert are one statement, so simultaneous callers cannot both win.
    pub async fn begin_sync(&self) -> Result<SyncLog, LecternError> {
        let log = SyncLog {
            id: new_id(),
            status: SyncStatus::InProgress,
            message: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        let res = sqlx::query(
            r#"INSERT INTO sync_logs (id, status, message, started_at)
               SELECT ?, ?, ?, ?
               WHERE NOT EXISTS (SELECT 1 FROM sync_logs WHERE status = ?)"#,
        )
        .bind(&log.id)
        .bind(log.status)
        .bind(&log.message)
        .bind(log.started_at)
        .bind(SyncStatus::InProgress)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            let running: Option<(String,)> = sqlx::query_as(
                "SELECT id FROM sync_logs WHERE status = ? ORDER BY started_at DESC LIMIT 1",
            )
            .bind(SyncStatus::InProgress)
            .fetch_optional(&self.pool)
            .await?;
            let id = running.map(|(id,)| id).unwrap_or_default();
            return Err(LecternError::Conflict(format!("sync {id} is already running")));
        }
        Ok(log)
    }

    pub async fn finish_sync(
        &self,
        id: &str,
        status: SyncStatus,
        message: impl Into<String>,
    ) -> Result<(), LecternError> {
        sqlx::query("UPDATE sync_logs SET status = ?, message = ?, finished_at = ? WHERE id = ?")
            .bind(status)
            .bind(message.into())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn latest_sync(&self) -> Result<Option<SyncLog>, LecternError> {
        Ok(sqlx::query_as::<_, SyncLog>(
            r#"SELECT id, status, message, started_at, finished_at
               FROM sync_logs ORDER BY started_at DESC LIMIT 1"#,
        )
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn recent_syncs(&self, limit: i64) -> Result<Vec<SyncLog>, LecternError> {
        Ok(sqlx::query_as::<_, SyncLog>(
            r#"SELECT id, status, message, started_at, finished_at
               FROM sync_logs ORDER BY started_at DESC LIMIT ?"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Runs left `in_progress` by a previous process can never finish; close them as errors.
    pub async fn mark_interrupted_syncs(&self) -> Result<u64, LecternError> {
        let res = sqlx::query(
            "UPDATE sync_logs SET status = ?, message = ?, finished_at = ? WHERE status = ?",
        )
        .bind(SyncStatus::Error)
        .bind("interrupted by server restart")
        .bind(Utc::now())
        .bind(SyncStatus::InProgress)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_begin_conflicts_until_first_finishes() {
        let db = LecternStorage::connect_in_memory().await.unwrap();
        let first = db.begin_sync().await.unwrap();
        assert!(matches!(db.begin_sync().await, Err(LecternError::Conflict(_))));

        db.finish_sync(&first.id, SyncStatus::Success, "ok").await.unwrap();
        let latest = db.latest_sync().await.unwrap().unwrap();
        assert_eq!(latest.status, SyncStatus::Success);
        assert!(latest.finished_at.is_some());

        db.begin_sync().await.unwrap();
    }

    #[tokio::test]
    async fn simultaneous_begins_admit_exactly_one() {
        let path = std::env::temp_dir().join(format!("lectern-sync-{}.sqlite", new_id()));
        let db = LecternStorage::connect(&format!("sqlite:{}", path.display()))
            .await
            .unwrap();

        let (a, b, c) = tokio::join!(db.begin_sync(), db.begin_sync(), db.begin_sync());
        let results = [a, b, c];
        let started = results.iter().filter(|r| r.is_ok()).count();
        let refused = results
            .iter()
            .filter(|r| matches!(r, Err(LecternError::Conflict(_))))
            .count();
        assert_eq!((started, refused), (1, 2));
        assert_eq!(db.recent_syncs(10).await.unwrap().len(), 1);

        db.pool.close().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn interrupted_runs_are_closed_as_errors() {
        let db = LecternStorage::connect_in_memory().await.unwrap();
        db.begin_sync().await.unwrap();
        assert_eq!(db.mark_interrupted_syncs().await.unwrap(), 1);
        let latest = db.latest_sync().await.unwrap().unwrap();
        assert_eq!(latest.status, SyncStatus::Error);
        assert_eq!(latest.message.as_deref(), Some("interrupted by server restart"));
    }
}
