use super::batcher::ProgressSink;
use super::offline::OfflineStore;
use crate::db::{Chapter, Course, Granularity, TextSegment};
use crate::error::LecternError;
use crate::types::{ProgressBatch, ProgressUpdate};
use futures::future::BoxFuture;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Typed client for the Lectern REST API.
#[derive(Clone)]
pub struct LecternClient {
    http: reqwest::Client,
    base_url: Url,
    /// Raw `name=value` pair of the signed-in session cookie.
    session_cookie: Option<String>,
}

impl LecternClient {
    pub fn new(base_url: Url) -> Result<Self, LecternError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("lectern-client/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            session_cookie: None,
        }
    }

    pub fn with_session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.session_cookie = Some(cookie.into());
        self
    }

    pub async fn list_courses(&self) -> Result<Vec<Course>, LecternError> {
        self.get_json(&["courses"], None).await
    }

    pub async fn chapter(&self, id: &str) -> Result<Chapter, LecternError> {
        self.get_json(&["chapters", id], None).await
    }

    pub async fn segments(
        &self,
        chapter_id: &str,
        granularity: Option<Granularity>,
    ) -> Result<Vec<TextSegment>, LecternError> {
        let query = granularity.map(|g| match g {
            Granularity::Sentence => ("granularity", "sentence"),
            Granularity::Word => ("granularity", "word"),
        });
        self.get_json(&["chapters", chapter_id, "segments"], query)
            .await
    }

    pub async fn send_progress(&self, updates: Vec<ProgressUpdate>) -> Result<(), LecternError> {
        let url = self.endpoint(&["progress", "batch"])?;
        let resp = self
            .authorized(self.http.post(url))
            .json(&ProgressBatch { updates })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(LecternError::UpstreamStatus(resp.status()));
        }
        Ok(())
    }

    /// Fetch a chapter's audio and keep it in the offline store. Returns the byte count.
    pub async fn download_to(
        &self,
        store: &OfflineStore,
        chapter_id: &str,
    ) -> Result<usize, LecternError> {
        let url = self.endpoint(&["chapters", chapter_id, "audio"])?;
        let resp = self.authorized(self.http.get(url)).send().await?;
        if !resp.status().is_success() {
            return Err(LecternError::UpstreamStatus(resp.status()));
        }
        let mime = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let body = resp.bytes().await?;
        store.put_audio(chapter_id, &body, &mime).await?;
        debug!(chapter_id, bytes = body.len(), "chapter saved for offline playback");
        Ok(body.len())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: Option<(&str, &str)>,
    ) -> Result<T, LecternError> {
        let mut url = self.endpoint(segments)?;
        if let Some((k, v)) = query {
            url.query_pairs_mut().append_pair(k, v);
        }
        let resp = self.authorized(self.http.get(url)).send().await?;
        match resp.status() {
            s if s.is_success() => Ok(resp.json::<T>().await?),
            reqwest::StatusCode::NOT_FOUND => Err(LecternError::NotFound(segments.join("/"))),
            reqwest::StatusCode::UNAUTHORIZED => Err(LecternError::Unauthorized),
            s => Err(LecternError::UpstreamStatus(s)),
        }
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.session_cookie {
            Some(cookie) => req.header(COOKIE, cookie),
            None => req,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, LecternError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LecternError::BadRequest(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }
}

impl ProgressSink for LecternClient {
    fn send(&self, batch: Vec<ProgressUpdate>) -> BoxFuture<'static, Result<(), LecternError>> {
        let this = self.clone();
        Box::pin(async move { this.send_progress(batch).await })
    }

    fn beacon(&self, batch: Vec<ProgressUpdate>) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.send_progress(batch).await {
                warn!(error = %e, "progress beacon lost");
            }
        });
    }
}
