use super::sqlite::{LecternStorage, new_id};
use crate::db::models::{MagicLink, Session, User};
use crate::error::LecternError;
use chrono::{DateTime, Utc};

impl LecternStorage {
    /// Look up a user by email, creating one on first sign-in.
    /// Admin rights are only ever granted, never revoked, here.
    pub async fn find_or_create_user(&self, email: &str, is_admin: bool) -> Result<User, LecternError> {
        let email = email.trim().to_lowercase();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO users (id, email, is_admin, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(email) DO UPDATE SET
                is_admin=MAX(users.is_admin, excluded.is_admin),
                updated_at=excluded.updated_at
            "#,
        )
        .bind(new_id())
        .bind(&email)
        .bind(is_admin)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(sqlx::query_as::<_, User>(
            "SELECT id, email, is_admin, created_at, updated_at FROM users WHERE email = ?",
        )
        .bind(&email)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>, LecternError> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT id, email, is_admin, created_at, updated_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn create_magic_link(
        &self,
        token: &str,
        email: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), LecternError> {
        sqlx::query(
            "INSERT INTO magic_links (token, email, expires_at, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(token)
        .bind(email.trim().to_lowercase())
        .bind(expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a sign-in token used and return its email. Unknown, used or expired tokens fail.
    pub async fn consume_magic_link(&self, token: &str) -> Result<String, LecternError> {
        let mut tx = self.pool.begin().await?;
        let link = sqlx::query_as::<_, MagicLink>(
            "SELECT token, email, expires_at, used_at, created_at FROM magic_links WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LecternError::InvalidMagicLink)?;

        let now = Utc::now();
        if link.used_at.is_some() || link.expires_at <= now {
            return Err(LecternError::InvalidMagicLink);
        }

        sqlx::query("UPDATE magic_links SET used_at = ? WHERE token = ? AND used_at IS NULL")
            .bind(now)
            .bind(token)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(link.email)
    }

    pub async fn create_session(
        &self,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, LecternError> {
        let session = Session {
            id: new_id(),
            user_id: user_id.to_string(),
            expires_at,
            created_at: Utc::now(),
        };
        sqlx::query("INSERT INTO sessions (id, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)")
            .bind(&session.id)
            .bind(&session.user_id)
            .bind(session.expires_at)
            .bind(session.created_at)
            .execute(&self.pool)
            .await?;
        Ok(session)
    }

    /// Resolve a live session to its user; expired sessions resolve to None.
    pub async fn session_user(&self, session_id: &str) -> Result<Option<User>, LecternError> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT id, user_id, expires_at, created_at FROM sessions WHERE id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        match session {
            Some(s) if s.expires_at > Utc::now() => self.get_user(&s.user_id).await,
            _ => Ok(None),
        }
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), LecternError> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
