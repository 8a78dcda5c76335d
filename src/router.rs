use crate::config::{AuthConfig, BasicConfig, Config};
use crate::db::LecternStorage;
use crate::error::LecternError;
use crate::handlers;
use crate::service::{ContentSync, DownloadService, Mailer};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use axum_extra::extract::cookie::Key;
use base64::Engine;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, warn};

const BODY_LIMIT: usize = 1024 * 1024;
const MAGIC_LINKS_PER_MINUTE: u32 = 5;
const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct LecternState {
    pub storage: LecternStorage,
    pub sync: ContentSync,
    pub downloads: DownloadService,
    pub mailer: Mailer,
    pub cookie_key: Key,
    pub admin_key: Option<Arc<str>>,
    pub basic: Arc<BasicConfig>,
    pub auth: AuthConfig,
    /// Per-email throttle on sign-in link requests.
    pub magic_link_limiter: Arc<DefaultKeyedRateLimiter<String>>,
}

impl LecternState {
    pub fn new(
        storage: LecternStorage,
        sync: ContentSync,
        downloads: DownloadService,
        mailer: Mailer,
        cfg: &Config,
    ) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(MAGIC_LINKS_PER_MINUTE).unwrap_or(NonZeroU32::MIN),
        );
        Self {
            storage,
            sync,
            downloads,
            mailer,
            cookie_key: cookie_key(&cfg.basic.cookie_secret),
            admin_key: cfg
                .basic
                .admin_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(Arc::from),
            basic: Arc::new(cfg.basic.clone()),
            auth: cfg.auth.clone(),
            magic_link_limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    /// Wire every service from configuration around an opened store.
    pub fn from_config(storage: LecternStorage, cfg: &Config) -> Result<Self, LecternError> {
        let api = crate::content_api::ContentApiClient::new(&cfg.content_api)?;
        let sync = ContentSync::new(storage.clone(), api);
        let downloads = DownloadService::new(storage.clone(), cfg.downloads.dir.clone())?;
        let mailer = Mailer::new(&cfg.email)?;
        let state = Self::new(storage, sync, downloads, mailer, cfg);
        spawn_limiter_pruning(Arc::downgrade(&state.magic_link_limiter));
        Ok(state)
    }
}

/// Periodically drop limiter entries whose quota has fully replenished.
/// Stops once the last state clone is gone.
fn spawn_limiter_pruning(limiter: Weak<DefaultKeyedRateLimiter<String>>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LIMITER_PRUNE_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(limiter) = limiter.upgrade() else {
                break;
            };
            prune_limiter(&limiter);
        }
    });
}

fn prune_limiter(limiter: &DefaultKeyedRateLimiter<String>) {
    let before = limiter.len();
    limiter.retain_recent();
    limiter.shrink_to_fit();
    debug!(before, after = limiter.len(), "magic link limiter pruned");
}

/// Session cookie key: 64+ bytes of secret (raw or base64), else random per boot.
fn cookie_key(secret: &str) -> Key {
    let secret = secret.trim();
    if secret.is_empty() {
        return Key::generate();
    }
    let raw = base64::engine::general_purpose::STANDARD
        .decode(secret)
        .ok()
        .filter(|b| b.len() >= 64)
        .unwrap_or_else(|| secret.as_bytes().to_vec());
    match Key::try_from(raw.as_slice()) {
        Ok(key) => key,
        Err(_) => {
            warn!("cookie_secret shorter than 64 bytes; sessions will not survive restarts");
            Key::generate()
        }
    }
}

pub fn lectern_router(state: LecternState) -> Router {
    let api = Router::new()
        .route("/courses", get(handlers::content::list_courses))
        .route("/courses/{id}", get(handlers::content::get_course))
        .route(
            "/courses/{id}/assignments",
            get(handlers::content::list_assignments),
        )
        .route("/assignments/{id}", get(handlers::content::get_assignment))
        .route(
            "/assignments/{id}/chapters",
            get(handlers::content::list_chapters),
        )
        .route("/chapters/{id}", get(handlers::content::get_chapter))
        .route(
            "/chapters/{id}/segments",
            get(handlers::content::list_segments),
        )
        .route("/chapters/{id}/audio", get(handlers::downloads::chapter_audio))
        .route(
            "/progress",
            get(handlers::progress::list_progress).post(handlers::progress::save_progress),
        )
        .route("/progress/batch", post(handlers::progress::save_progress_batch))
        .route("/progress/{chapter_id}", get(handlers::progress::get_progress))
        .route(
            "/downloads",
            get(handlers::downloads::list_downloads).post(handlers::downloads::create_download),
        )
        .route(
            "/downloads/{chapter_id}",
            delete(handlers::downloads::delete_download),
        )
        .route("/admin/sync", post(handlers::admin::trigger_sync))
        .route("/admin/sync/status", get(handlers::admin::sync_status))
        .route("/admin/sync/logs", get(handlers::admin::sync_logs))
        .route("/auth/magic-link", post(handlers::auth::request_magic_link))
        .route("/auth/verify", get(handlers::auth::verify_magic_link))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/me", get(handlers::auth::me))
        .route("/healthz", get(handlers::healthz));

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_secrets_give_a_stable_key() {
        let secret = "k".repeat(64);
        assert_eq!(cookie_key(&secret).master(), cookie_key(&secret).master());

        let encoded = base64::engine::general_purpose::STANDARD.encode([7u8; 64]);
        assert_eq!(cookie_key(&encoded).master(), &[7u8; 64][..]);
    }

    #[test]
    fn pruning_forgets_replenished_emails() {
        let quota = Quota::with_period(Duration::from_millis(1))
            .unwrap()
            .allow_burst(NonZeroU32::MIN);
        let limiter: DefaultKeyedRateLimiter<String> = RateLimiter::keyed(quota);
        limiter.check_key(&"a@example.com".to_string()).unwrap();
        limiter.check_key(&"b@example.com".to_string()).unwrap();
        assert_eq!(limiter.len(), 2);

        std::thread::sleep(Duration::from_millis(20));
        prune_limiter(&limiter);
        assert!(limiter.is_empty());
    }

    #[test]
    fn short_or_empty_secrets_fall_back_to_random_keys() {
        assert_ne!(cookie_key("short").master(), cookie_key("short").master());
        assert_ne!(cookie_key("").master(), cookie_key("").master());
    }
}
