use crate::db::User;
use crate::error::LecternError;
use crate::middleware::{AuthUser, SESSION_COOKIE};
use crate::router::LecternState;
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use time::Duration;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct MagicLinkRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub token: String,
}

/// POST /api/auth/magic-link: store a single-use token and mail the verify link.
pub async fn request_magic_link(
    State(state): State<LecternState>,
    Json(req): Json<MagicLinkRequest>,
) -> Result<impl IntoResponse, LecternError> {
    let email = req.email.trim().to_lowercase();
    if !looks_like_email(&email) {
        return Err(LecternError::BadRequest("a valid email is required".to_string()));
    }
    if state.magic_link_limiter.check_key(&email).is_err() {
        warn!(email, "magic link requests throttled");
        return Err(LecternError::RateLimited);
    }

    let token = new_token();
    let expires_at = Utc::now() + chrono::Duration::minutes(state.auth.magic_link_ttl_mins);
    state
        .storage
        .create_magic_link(&token, &email, expires_at)
        .await?;

    let mut link = state.basic.public_url.join("/api/auth/verify")?;
    link.query_pairs_mut().append_pair("token", &token);
    state.mailer.send_magic_link(&email, &link).await?;

    info!(email, "magic link issued");
    Ok((StatusCode::ACCEPTED, Json(json!({ "sent": true }))))
}

/// GET /api/auth/verify?token=: consume the token, open a session, go home.
pub async fn verify_magic_link(
    State(state): State<LecternState>,
    Query(query): Query<VerifyQuery>,
    jar: PrivateCookieJar,
) -> Result<impl IntoResponse, LecternError> {
    let email = state.storage.consume_magic_link(query.token.trim()).await?;
    let user = state
        .storage
        .find_or_create_user(&email, state.basic.is_admin_email(&email))
        .await?;

    let ttl_days = state.auth.session_ttl_days.max(1);
    let session = state
        .storage
        .create_session(&user.id, Utc::now() + chrono::Duration::days(ttl_days))
        .await?;

    info!(user_id = %user.id, "signed in");
    let cookie = build_cookie(
        SESSION_COOKIE,
        session.id,
        Duration::days(ttl_days),
        !state.basic.insecure_cookie,
    );
    Ok((jar.add(cookie), Redirect::to("/")))
}

pub async fn logout(
    State(state): State<LecternState>,
    jar: PrivateCookieJar,
) -> Result<impl IntoResponse, LecternError> {
    if let Some(session_id) = jar.get(SESSION_COOKIE).map(|c| c.value().to_owned()) {
        state.storage.delete_session(&session_id).await?;
    }
    Ok((jar.remove(clear_cookie(SESSION_COOKIE)), StatusCode::NO_CONTENT))
}

pub async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !email.contains(' ')
        }
        None => false,
    }
}

/// 32 random bytes, URL-safe.
fn new_token() -> String {
    let mut raw = [0u8; 32];
    raw[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    raw[16..].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
}

fn build_cookie(name: &str, value: String, max_age: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build(Cookie::new(name.to_string(), value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(max_age)
        .build()
}

fn clear_cookie(name: &str) -> Cookie<'static> {
    Cookie::build(Cookie::new(name.to_string(), ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape_check() {
        assert!(looks_like_email("ada@example.com"));
        assert!(!looks_like_email("ada@localhost"));
        assert!(!looks_like_email("@example.com"));
        assert!(!looks_like_email("not an email"));
    }

    #[test]
    fn tokens_are_long_and_unique() {
        let a = new_token();
        assert_eq!(a.len(), 43);
        assert_ne!(a, new_token());
        assert!(!a.contains('+') && !a.contains('/'));
    }

    #[test]
    fn session_cookie_is_http_only() {
        let c = build_cookie(SESSION_COOKIE, "abc".into(), Duration::days(1), true);
        assert_eq!(c.http_only(), Some(true));
        assert_eq!(c.secure(), Some(true));
        assert_eq!(c.same_site(), Some(SameSite::Lax));
    }
}
