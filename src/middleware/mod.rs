pub mod auth;

pub use auth::{ADMIN_KEY_HEADER, AuthUser, RequireAdmin, SESSION_COOKIE};
