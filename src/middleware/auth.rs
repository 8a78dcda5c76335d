use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use axum_extra::extract::cookie::{Key, PrivateCookieJar};
use headers::{Authorization, authorization::Bearer};
use subtle::ConstantTimeEq;

use crate::db::User;
use crate::error::LecternError;
use crate::router::LecternState;

/// Name of the encrypted cookie carrying the session id.
pub const SESSION_COOKIE: &str = "lectern_session";

/// Header accepted by admin endpoints in place of an admin session.
pub const ADMIN_KEY_HEADER: &str = "x-lectern-key";

/// The signed-in user. Rejects with 401 when the session is missing or expired.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl FromRequestParts<LecternState> for AuthUser {
    type Rejection = LecternError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &LecternState,
    ) -> Result<Self, Self::Rejection> {
        session_user(parts, state)
            .await?
            .map(AuthUser)
            .ok_or(LecternError::Unauthorized)
    }
}

/// Admin gate: the configured admin key, or a session of an admin user.
#[derive(Debug, Clone)]
pub struct RequireAdmin {
    /// `None` when the caller authenticated with the admin key.
    pub user: Option<User>,
}

impl FromRequestParts<LecternState> for RequireAdmin {
    type Rejection = LecternError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &LecternState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(expected) = state.admin_key.as_deref()
            && presented_key(parts, state)
                .await
                .is_some_and(|k| bool::from(k.as_bytes().ct_eq(expected.as_bytes())))
        {
            return Ok(Self { user: None });
        }

        match session_user(parts, state).await? {
            Some(user) if user.is_admin => Ok(Self { user: Some(user) }),
            Some(_) => Err(LecternError::Forbidden),
            None => Err(LecternError::Unauthorized),
        }
    }
}

async fn presented_key(parts: &mut Parts, state: &LecternState) -> Option<String> {
    if let Some(v) = parts
        .headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        return Some(v.trim().to_string());
    }
    TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
        .await
        .ok()
        .map(|TypedHeader(Authorization(bearer))| bearer.token().to_string())
}

async fn session_user(
    parts: &mut Parts,
    state: &LecternState,
) -> Result<Option<User>, LecternError> {
    let Ok(jar) = PrivateCookieJar::<Key>::from_request_parts(parts, state).await;
    let Some(session_id) = jar.get(SESSION_COOKIE).map(|c| c.value().to_owned()) else {
        return Ok(None);
    };
    state.storage.session_user(&session_id).await
}

impl FromRef<LecternState> for Key {
    fn from_ref(state: &LecternState) -> Self {
        state.cookie_key.clone()
    }
}
