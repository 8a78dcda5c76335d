use super::types::{ApiAssignment, ApiCourse, ApiLearningObject, parse_list};
use crate::config::ContentApiConfig;
use crate::error::{IsRetryable, LecternError};
use backon::{ExponentialBuilder, Retryable};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

fn default_retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(3)
        .with_jitter()
}

/// Bearer-authenticated reader for the upstream course-content API.
#[derive(Clone)]
pub struct ContentApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
    retry_policy: ExponentialBuilder,
}

impl ContentApiClient {
    pub fn new(cfg: &ContentApiConfig) -> Result<Self, LecternError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("lectern/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()?;
        Ok(Self::with_client(http, cfg.base_url.clone(), cfg.token.clone()))
    }

    pub fn with_client(http: reqwest::Client, base_url: Url, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url,
            token: token.into(),
            retry_policy: default_retry_policy(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: ExponentialBuilder) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub async fn list_courses(&self) -> Result<Vec<ApiCourse>, LecternError> {
        self.get_list(&["courses"]).await
    }

    pub async fn list_assignments(
        &self,
        course_external_id: &str,
    ) -> Result<Vec<ApiAssignment>, LecternError> {
        self.get_list(&["courses", course_external_id, "assignments"])
            .await
    }

    pub async fn list_learning_objects(
        &self,
        assignment_external_id: &str,
    ) -> Result<Vec<ApiLearningObject>, LecternError> {
        self.get_list(&["assignments", assignment_external_id, "learning-objects"])
            .await
    }

    async fn get_list<T>(&self, segments: &[&str]) -> Result<Vec<T>, LecternError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = self.endpoint(segments)?;
        let path = url.path().to_string();

        let body = (|| async { self.fetch_bytes(url.clone()).await })
            .retry(self.retry_policy)
            .when(|e: &LecternError| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!(path = %path, "content API retrying after error {}, sleeping {:?}", err, dur);
            })
            .await?;

        let items = parse_list::<T>(&body)?;
        debug!(path = %path, count = items.len(), "content API list fetched");
        Ok(items)
    }

    /// Append percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, LecternError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LecternError::BadRequest(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn fetch_bytes(&self, url: Url) -> Result<Vec<u8>, LecternError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LecternError::UpstreamStatus(status));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}
