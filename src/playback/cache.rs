//! Request caching for offline use, backed by the `http_cache` store.

use super::offline::OfflineStore;
use crate::error::LecternError;
use axum::body::Bytes;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// Serve from cache, fetch and store on a miss.
    CacheFirst,
    /// Fetch, refresh the cache; fall back to the cache when the network fails.
    NetworkFirst,
    NetworkOnly,
}

const STATIC_EXTENSIONS: &[&str] = &[
    "js", "css", "png", "jpg", "jpeg", "svg", "webp", "ico", "woff", "woff2",
];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "ogg", "wav", "webm"];

pub fn strategy_for(url: &Url) -> CacheStrategy {
    let path = url.path();
    if path.starts_with("/api/auth") || path.starts_with("/api/admin") {
        return CacheStrategy::NetworkOnly;
    }
    if path.starts_with("/api/chapters/") && path.ends_with("/audio") {
        return CacheStrategy::CacheFirst;
    }
    if path.starts_with("/api/") {
        return CacheStrategy::NetworkFirst;
    }
    let ext = path
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    if AUDIO_EXTENSIONS.contains(&ext.as_str()) || STATIC_EXTENSIONS.contains(&ext.as_str()) {
        CacheStrategy::CacheFirst
    } else {
        CacheStrategy::NetworkFirst
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedResponse {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub from_cache: bool,
}

/// GET with the strategy picked by `strategy_for`.
#[derive(Clone)]
pub struct CachedFetcher {
    http: reqwest::Client,
    store: OfflineStore,
}

impl CachedFetcher {
    pub fn new(http: reqwest::Client, store: OfflineStore) -> Self {
        Self { http, store }
    }

    pub async fn get(&self, url: &Url) -> Result<FetchedResponse, LecternError> {
        match strategy_for(url) {
            CacheStrategy::NetworkOnly => self.fetch(url).await,
            CacheStrategy::CacheFirst => {
                if let Some(hit) = self.cached(url).await? {
                    debug!(url = %url, "cache hit");
                    return Ok(hit);
                }
                let resp = self.fetch(url).await?;
                self.store_response(url, &resp).await;
                Ok(resp)
            }
            CacheStrategy::NetworkFirst => match self.fetch(url).await {
                Ok(resp) => {
                    self.store_response(url, &resp).await;
                    Ok(resp)
                }
                Err(e) => match self.cached(url).await? {
                    Some(hit) => {
                        warn!(url = %url, error = %e, "network failed; serving cached copy");
                        Ok(hit)
                    }
                    None => Err(e),
                },
            },
        }
    }

    async fn fetch(&self, url: &Url) -> Result<FetchedResponse, LecternError> {
        let resp = self.http.get(url.clone()).send().await?;
        if !resp.status().is_success() {
            return Err(LecternError::UpstreamStatus(resp.status()));
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(FetchedResponse {
            body: resp.bytes().await?,
            content_type,
            from_cache: false,
        })
    }

    async fn cached(&self, url: &Url) -> Result<Option<FetchedResponse>, LecternError> {
        Ok(self
            .store
            .cache_get(url.as_str())
            .await?
            .map(|hit| FetchedResponse {
                body: Bytes::from(hit.body),
                content_type: hit.content_type,
                from_cache: true,
            }))
    }

    async fn store_response(&self, url: &Url, resp: &FetchedResponse) {
        if let Err(e) = self
            .store
            .cache_put(url.as_str(), resp.content_type.as_deref(), &resp.body)
            .await
        {
            warn!(url = %url, error = %e, "failed to cache response");
        }
    }
}
